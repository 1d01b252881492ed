//! `CreateSnapshots` step.

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
pub struct CreateSnapshotsStep(pub Vec<SnapshotSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SnapshotSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    /// Disk to snapshot: a workflow disk name or a disk link.
    pub source_disk: String,
}

impl CreateSnapshotsStep {
    async fn create_one(&self, workflow: &Workflow, snapshot: &SnapshotSpec) -> Result<()> {
        if snapshot.resource.over_write {
            snapshot.resource.delete_existing(workflow, ResourceKind::Snapshot).await?;
        }

        let source = workflow
            .registries
            .resolve(ResourceKind::Disk, &snapshot.source_disk, &snapshot.resource.project, &workflow.zone);
        let payload = gantry_types::Snapshot {
            name: snapshot.resource.real_name.clone(),
            source_disk: source.link.clone(),
        };
        let operation = workflow
            .api
            .create_snapshot(&source.project, &source.locus, &source.name, &payload)
            .await
            .map_err(api_err)?;
        // Snapshot insertion is reported on the source disk's zone.
        gantry_compute::wait_for_operation(
            workflow.api.as_ref(),
            &source.project,
            gantry_compute::OperationScope::Zone(&source.locus),
            &operation,
        )
        .await
        .map_err(api_err)?;
        info!(snapshot = %snapshot.resource.real_name, disk = %source.name, "created snapshot");
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateSnapshotsStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for snapshot in &mut self.0 {
            snapshot.resource.populate(workflow, ResourceKind::Snapshot);
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("CreateSnapshots requires at least one snapshot"));
        }
        let step_id = workflow.qualified(step_name);
        for snapshot in &self.0 {
            if snapshot.source_disk.is_empty() {
                return Err(FlowError::invalid_input(format!(
                    "snapshot {:?} is missing a SourceDisk",
                    snapshot.resource.name
                )));
            }
            workflow.registries.use_resource(ResourceKind::Disk, &snapshot.source_disk, &step_id)?;
            snapshot.resource.validate_and_register(workflow, ResourceKind::Snapshot, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|snapshot| self.create_one(workflow, snapshot))).await?;
        Ok(())
    }
}
