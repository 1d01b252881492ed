//! `CopyGCSObjects` step.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{FlowError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::sources::parse_gcs_path;
use crate::steps::StepAction;
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CopyGcsObjectsStep(pub Vec<CopySpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CopySpec {
    pub source: String,
    pub destination: String,
}

#[async_trait]
impl StepAction for CopyGcsObjectsStep {
    fn populate(&mut self, _workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        Ok(())
    }

    fn validate(&self, _workflow: &Workflow, _step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("CopyGCSObjects requires at least one copy"));
        }
        for copy in &self.0 {
            parse_gcs_path(&copy.source)?;
            parse_gcs_path(&copy.destination)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|copy| async move {
            workflow.stager.copy_object(&copy.source, &copy.destination).await?;
            info!(source = %copy.source, destination = %copy.destination, "copied object");
            Ok::<(), FlowError>(())
        }))
        .await?;
        Ok(())
    }
}
