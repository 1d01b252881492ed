//! `RunTests` step.
//!
//! Runs a test-harness workflow in isolation: the referenced document
//! executes like a sub-workflow (own registries, own cleanup) so test
//! resources never leak into the calling workflow's lifecycle.

use async_trait::async_trait;
use gantry_types::Result;
use serde::{Deserialize, Serialize};

use crate::steps::{StepAction, SubWorkflowStep};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTestsStep(pub SubWorkflowStep);

#[async_trait]
impl StepAction for RunTestsStep {
    fn populate(&mut self, workflow: &mut Workflow, step_name: &str) -> Result<()> {
        self.0.populate(workflow, step_name)
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        self.0.validate(workflow, step_name)
    }

    async fn run(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        self.0.run(workflow, step_name).await
    }
}
