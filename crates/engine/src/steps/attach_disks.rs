//! `AttachDisks` step.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{AttachedDisk, FlowError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ResourceKind;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachDisksStep(pub Vec<AttachDiskSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AttachDiskSpec {
    /// Disk to attach: a workflow disk name or a disk link.
    pub source: String,
    /// Instance to attach to: a workflow instance name or an instance link.
    pub instance: String,
    /// Defaults to the disk's resolved name.
    pub device_name: String,
    /// `READ_WRITE` (default) or `READ_ONLY`.
    pub mode: String,
}

impl AttachDisksStep {
    async fn attach_one(&self, workflow: &Workflow, attachment: &AttachDiskSpec) -> Result<()> {
        let disk = workflow
            .registries
            .resolve(ResourceKind::Disk, &attachment.source, &workflow.project, &workflow.zone);
        let instance = workflow
            .registries
            .resolve(ResourceKind::Instance, &attachment.instance, &workflow.project, &workflow.zone);

        let payload = AttachedDisk {
            source: disk.link.clone(),
            device_name: if attachment.device_name.is_empty() {
                disk.name.clone()
            } else {
                attachment.device_name.clone()
            },
            mode: attachment.mode.clone(),
            ..Default::default()
        };
        let operation = workflow
            .api
            .attach_disk(&instance.project, &instance.locus, &instance.name, &payload)
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
        info!(disk = %disk.name, instance = %instance.name, "attached disk");
        Ok(())
    }
}

#[async_trait]
impl StepAction for AttachDisksStep {
    fn populate(&mut self, _workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for attachment in &mut self.0 {
            if attachment.mode.is_empty() {
                attachment.mode = "READ_WRITE".into();
            }
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("AttachDisks requires at least one attachment"));
        }
        let step_id = workflow.qualified(step_name);
        for attachment in &self.0 {
            if attachment.source.is_empty() || attachment.instance.is_empty() {
                return Err(FlowError::invalid_input("AttachDisks requires both Source and Instance"));
            }
            if !matches!(attachment.mode.as_str(), "READ_WRITE" | "READ_ONLY") {
                return Err(FlowError::invalid_input(format!(
                    "attachment of {:?} has invalid Mode {:?}",
                    attachment.source, attachment.mode
                )));
            }
            let disk_link = workflow.registries.use_resource(ResourceKind::Disk, &attachment.source, &step_id)?;
            let instance_link = workflow.registries.use_resource(ResourceKind::Instance, &attachment.instance, &step_id)?;
            workflow
                .registries
                .connect(&workflow.registries.disk_attachments, &disk_link, &instance_link, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|attachment| self.attach_one(workflow, attachment))).await?;
        Ok(())
    }
}
