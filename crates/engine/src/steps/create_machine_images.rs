//! `CreateMachineImages` step.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{FlowError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ResourceKind;
use crate::steps::resource::ResourceSpec;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateMachineImagesStep(pub Vec<MachineImageSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MachineImageSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    /// Instance to capture: a workflow instance name or an instance link.
    pub source_instance: String,
    pub storage_locations: Vec<String>,
}

impl CreateMachineImagesStep {
    async fn create_one(&self, workflow: &Workflow, machine_image: &MachineImageSpec) -> Result<()> {
        if machine_image.resource.over_write {
            machine_image.resource.delete_existing(workflow, ResourceKind::MachineImage).await?;
        }

        let payload = gantry_types::MachineImage {
            name: machine_image.resource.real_name.clone(),
            source_instance: workflow
                .registries
                .resolve(ResourceKind::Instance, &machine_image.source_instance, &machine_image.resource.project, &workflow.zone)
                .link,
            storage_locations: machine_image.storage_locations.clone(),
        };
        let operation = workflow
            .api
            .create_machine_image(&machine_image.resource.project, &payload)
            .await
            .map_err(api_err)?;
        machine_image.resource.await_operation(workflow, ResourceKind::MachineImage, &operation).await?;
        info!(machine_image = %machine_image.resource.real_name, "created machine image");
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateMachineImagesStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for machine_image in &mut self.0 {
            machine_image.resource.populate(workflow, ResourceKind::MachineImage);
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("CreateMachineImages requires at least one machine image"));
        }
        let step_id = workflow.qualified(step_name);
        for machine_image in &self.0 {
            if machine_image.source_instance.is_empty() {
                return Err(FlowError::invalid_input(format!(
                    "machine image {:?} is missing a SourceInstance",
                    machine_image.resource.name
                )));
            }
            workflow
                .registries
                .use_resource(ResourceKind::Instance, &machine_image.source_instance, &step_id)?;
            machine_image.resource.validate_and_register(workflow, ResourceKind::MachineImage, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|machine_image| self.create_one(workflow, machine_image))).await?;
        Ok(())
    }
}
