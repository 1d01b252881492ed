//! `DetachDisks` step.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{FlowError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ResourceKind;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetachDisksStep(pub Vec<DetachDiskSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DetachDiskSpec {
    /// Disk to detach: a workflow disk name or a disk link.
    pub source: String,
    /// Instance to detach from: a workflow instance name or a link.
    pub instance: String,
    /// Defaults to the disk's resolved name, matching the attach default.
    pub device_name: String,
}

impl DetachDisksStep {
    async fn detach_one(&self, workflow: &Workflow, detachment: &DetachDiskSpec) -> Result<()> {
        let disk = workflow
            .registries
            .resolve(ResourceKind::Disk, &detachment.source, &workflow.project, &workflow.zone);
        let instance = workflow
            .registries
            .resolve(ResourceKind::Instance, &detachment.instance, &workflow.project, &workflow.zone);
        let device_name = if detachment.device_name.is_empty() {
            disk.name.clone()
        } else {
            detachment.device_name.clone()
        };

        let operation = workflow
            .api
            .detach_disk(&instance.project, &instance.locus, &instance.name, &device_name)
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
        info!(disk = %disk.name, instance = %instance.name, "detached disk");
        Ok(())
    }
}

#[async_trait]
impl StepAction for DetachDisksStep {
    fn populate(&mut self, _workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("DetachDisks requires at least one detachment"));
        }
        let step_id = workflow.qualified(step_name);
        for detachment in &self.0 {
            if detachment.source.is_empty() || detachment.instance.is_empty() {
                return Err(FlowError::invalid_input("DetachDisks requires both Source and Instance"));
            }
            let disk_link = workflow.registries.use_resource(ResourceKind::Disk, &detachment.source, &step_id)?;
            let instance_link = workflow.registries.use_resource(ResourceKind::Instance, &detachment.instance, &step_id)?;
            workflow
                .registries
                .disconnect(&workflow.registries.disk_attachments, &disk_link, &instance_link, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|detachment| self.detach_one(workflow, detachment))).await?;
        Ok(())
    }
}
