//! `DeprecateImages` step.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{DeprecationStatus, FlowError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ResourceKind;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeprecateImagesStep(pub Vec<DeprecateImageSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeprecateImageSpec {
    /// Image to transition: a workflow image name or an image link.
    pub image: String,
    pub project: String,
    pub deprecation_status: DeprecationStatusSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeprecationStatusSpec {
    /// One of `ACTIVE`, `DEPRECATED`, `OBSOLETE`, `DELETED`.
    pub state: String,
    pub replacement: String,
}

impl DeprecateImagesStep {
    async fn deprecate_one(&self, workflow: &Workflow, spec: &DeprecateImageSpec) -> Result<()> {
        let image = workflow.registries.resolve(ResourceKind::Image, &spec.image, &spec.project, "");
        let status = DeprecationStatus {
            state: spec.deprecation_status.state.clone(),
            replacement: spec.deprecation_status.replacement.clone(),
        };
        let operation = workflow
            .api
            .deprecate_image(&image.project, &image.name, &status)
            .await
            .map_err(api_err)?;
        gantry_compute::wait_for_operation(workflow.api.as_ref(), &image.project, gantry_compute::OperationScope::Global, &operation)
            .await
            .map_err(api_err)?;
        info!(image = %image.name, state = %status.state, "deprecated image");
        Ok(())
    }
}

#[async_trait]
impl StepAction for DeprecateImagesStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for spec in &mut self.0 {
            if spec.project.is_empty() {
                spec.project = workflow.project.clone();
            }
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("DeprecateImages requires at least one image"));
        }
        let step_id = workflow.qualified(step_name);
        for spec in &self.0 {
            if spec.image.is_empty() {
                return Err(FlowError::invalid_input("DeprecateImages entry is missing an Image"));
            }
            match spec.deprecation_status.state.as_str() {
                "ACTIVE" | "DEPRECATED" | "OBSOLETE" | "DELETED" => {}
                other => {
                    return Err(FlowError::invalid_input(format!(
                        "image {:?} has invalid deprecation state {other:?}",
                        spec.image
                    )));
                }
            }
            workflow.registries.use_resource(ResourceKind::Image, &spec.image, &step_id)?;
            workflow
                .registries
                .of(ResourceKind::Image)
                .lock()
                .expect("resource registry lock poisoned")
                .set_deprecation_state(&spec.image, &spec.deprecation_status.state);
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|spec| self.deprecate_one(workflow, spec))).await?;
        Ok(())
    }
}
