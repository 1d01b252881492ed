//! `UpdateInstancesMetadata` step.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{FlowError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ResourceKind;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateInstancesMetadataStep(pub Vec<UpdateMetadataSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UpdateMetadataSpec {
    /// Instance to update: a workflow instance name or an instance link.
    pub instance: String,
    pub metadata: IndexMap<String, String>,
}

impl UpdateInstancesMetadataStep {
    /// Read-modify-write: merge the new keys into the current metadata under
    /// the fingerprint the API returned, so concurrent edits are rejected
    /// server-side.
    async fn update_one(&self, workflow: &Workflow, spec: &UpdateMetadataSpec) -> Result<()> {
        let instance = workflow
            .registries
            .resolve(ResourceKind::Instance, &spec.instance, &workflow.project, &workflow.zone);

        let current = workflow
            .api
            .get_instance(&instance.project, &instance.locus, &instance.name)
            .await
            .map_err(api_err)?;
        let mut metadata = current.metadata.unwrap_or_default();
        for (key, value) in &spec.metadata {
            metadata.set(key, value);
        }

        let operation = workflow
            .api
            .set_instance_metadata(&instance.project, &instance.locus, &instance.name, &metadata)
            .await
            .map_err(api_err)?;
        gantry_compute::wait_for_operation(
            workflow.api.as_ref(),
            &instance.project,
            gantry_compute::OperationScope::Zone(&instance.locus),
            &operation,
        )
        .await
        .map_err(api_err)?;
        info!(instance = %instance.name, keys = spec.metadata.len(), "updated instance metadata");
        Ok(())
    }
}

#[async_trait]
impl StepAction for UpdateInstancesMetadataStep {
    fn populate(&mut self, _workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("UpdateInstancesMetadata requires at least one instance"));
        }
        let step_id = workflow.qualified(step_name);
        for spec in &self.0 {
            if spec.instance.is_empty() {
                return Err(FlowError::invalid_input("UpdateInstancesMetadata entry is missing an Instance"));
            }
            if spec.metadata.is_empty() {
                return Err(FlowError::invalid_input(format!(
                    "metadata update for {:?} has no key/value pairs",
                    spec.instance
                )));
            }
            workflow.registries.use_resource(ResourceKind::Instance, &spec.instance, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|spec| self.update_one(workflow, spec))).await?;
        Ok(())
    }
}
