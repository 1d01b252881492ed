//! `CreateDisks` step.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{FlowError, Result};
use gantry_util::links::templates;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ResourceKind;
use crate::steps::resource::ResourceSpec;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateDisksStep(pub Vec<DiskSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiskSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    /// Image to initialize from: a workflow image name or an image link.
    pub source_image: String,
    /// Snapshot to initialize from; mutually exclusive with `SourceImage`.
    pub source_snapshot: String,
    pub size_gb: Option<i64>,
    /// Disk type short name or link, e.g. `pd-ssd`.
    #[serde(rename = "Type")]
    pub disk_type: String,
    pub licenses: Vec<String>,
}

impl CreateDisksStep {
    async fn create_one(&self, workflow: &Workflow, disk: &DiskSpec) -> Result<()> {
        if disk.resource.over_write {
            disk.resource.delete_existing(workflow, ResourceKind::Disk).await?;
        }

        let mut payload = gantry_types::Disk {
            name: disk.resource.real_name.clone(),
            zone: disk.resource.zone.clone(),
            size_gb: disk.size_gb,
            disk_type: disk.disk_type.clone(),
            licenses: disk.licenses.clone(),
            ..Default::default()
        };
        if !disk.source_image.is_empty() {
            payload.source_image = workflow
                .registries
                .resolve(ResourceKind::Image, &disk.source_image, &disk.resource.project, "")
                .link;
        }
        if !disk.source_snapshot.is_empty() {
            payload.source_snapshot = workflow
                .registries
                .resolve(ResourceKind::Snapshot, &disk.source_snapshot, &disk.resource.project, "")
                .link;
        }

        let operation = workflow
            .api
            .create_disk(&disk.resource.project, &disk.resource.zone, &payload)
            .await
            .map_err(api_err)?;
        disk.resource.await_operation(workflow, ResourceKind::Disk, &operation).await?;
        info!(disk = %disk.resource.real_name, zone = %disk.resource.zone, "created disk");
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateDisksStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for disk in &mut self.0 {
            disk.resource.populate(workflow, ResourceKind::Disk);
            if !disk.disk_type.is_empty() {
                disk.disk_type = templates::DISK_TYPE.extend(&disk.disk_type, &disk.resource.project, &disk.resource.zone);
            }
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("CreateDisks requires at least one disk"));
        }
        let step_id = workflow.qualified(step_name);
        for disk in &self.0 {
            if !disk.source_image.is_empty() && !disk.source_snapshot.is_empty() {
                return Err(FlowError::invalid_input(format!(
                    "disk {:?} sets both SourceImage and SourceSnapshot",
                    disk.resource.name
                )));
            }
            if !disk.source_image.is_empty() {
                workflow.registries.use_resource(ResourceKind::Image, &disk.source_image, &step_id)?;
            }
            if !disk.source_snapshot.is_empty() {
                workflow.registries.use_resource(ResourceKind::Snapshot, &disk.source_snapshot, &step_id)?;
            }
            disk.resource.validate_and_register(workflow, ResourceKind::Disk, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|disk| self.create_one(workflow, disk))).await?;
        Ok(())
    }
}
