//! `CreateImages` step.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{FlowError, RawDisk, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ResourceKind;
use crate::sources::is_gcs_path;
use crate::steps::resource::ResourceSpec;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateImagesStep(pub Vec<ImageSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ImageSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    /// Disk to image: a workflow disk name or a disk link.
    pub source_disk: String,
    /// Image to copy: a workflow image name or an image link.
    pub source_image: String,
    /// Raw disk tarball in object storage.
    pub raw_disk: String,
    pub family: String,
    pub licenses: Vec<String>,
}

impl ImageSpec {
    fn source_count(&self) -> usize {
        [&self.source_disk, &self.source_image, &self.raw_disk]
            .iter()
            .filter(|s| !s.is_empty())
            .count()
    }
}

impl CreateImagesStep {
    async fn create_one(&self, workflow: &Workflow, image: &ImageSpec) -> Result<()> {
        if image.resource.over_write {
            image.resource.delete_existing(workflow, ResourceKind::Image).await?;
        }

        let mut payload = gantry_types::Image {
            name: image.resource.real_name.clone(),
            family: image.family.clone(),
            licenses: image.licenses.clone(),
            ..Default::default()
        };
        if !image.source_disk.is_empty() {
            payload.source_disk = workflow
                .registries
                .resolve(ResourceKind::Disk, &image.source_disk, &image.resource.project, &workflow.zone)
                .link;
        }
        if !image.source_image.is_empty() {
            payload.source_image = workflow
                .registries
                .resolve(ResourceKind::Image, &image.source_image, &image.resource.project, "")
                .link;
        }
        if !image.raw_disk.is_empty() {
            payload.raw_disk = Some(RawDisk {
                source: image.raw_disk.clone(),
            });
        }

        let operation = workflow.api.create_image(&image.resource.project, &payload).await.map_err(api_err)?;
        image.resource.await_operation(workflow, ResourceKind::Image, &operation).await?;
        info!(image = %image.resource.real_name, "created image");
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateImagesStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for image in &mut self.0 {
            image.resource.populate(workflow, ResourceKind::Image);
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("CreateImages requires at least one image"));
        }
        let step_id = workflow.qualified(step_name);
        for image in &self.0 {
            if image.source_count() != 1 {
                return Err(FlowError::invalid_input(format!(
                    "image {:?} must set exactly one of SourceDisk, SourceImage, RawDisk",
                    image.resource.name
                )));
            }
            if !image.source_disk.is_empty() {
                workflow.registries.use_resource(ResourceKind::Disk, &image.source_disk, &step_id)?;
            }
            if !image.source_image.is_empty() {
                workflow.registries.use_resource(ResourceKind::Image, &image.source_image, &step_id)?;
            }
            if !image.raw_disk.is_empty() && !is_gcs_path(&image.raw_disk) {
                return Err(FlowError::invalid_input(format!(
                    "image {:?} RawDisk {:?} is not an object-store URL",
                    image.resource.name, image.raw_disk
                )));
            }
            image.resource.validate_and_register(workflow, ResourceKind::Image, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|image| self.create_one(workflow, image))).await?;
        Ok(())
    }
}
