//! `SubWorkflow` step.
//!
//! Unlike an include, a sub-workflow is isolated: it gets its own resource
//! registries and dependency graph, stages its own sources, and cleans up
//! its own resources when it finishes. It still shares the parent's run id
//! and cancel signal, so cancellation reaches every descendant.

use async_trait::async_trait;
use gantry_types::{ErrorList, FlowError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::scheduler;
use crate::steps::StepAction;
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SubWorkflowStep {
    /// Document path, relative to the parent workflow's directory.
    pub path: String,
    /// Variable bindings passed through to the child.
    pub vars: IndexMap<String, String>,
    #[serde(skip)]
    pub workflow: Option<Arc<Workflow>>,
}

impl SubWorkflowStep {
    pub(crate) fn child(&self) -> Result<&Arc<Workflow>> {
        self.workflow
            .as_ref()
            .ok_or_else(|| FlowError::invalid_input("sub-workflow was not populated"))
    }

    pub(crate) async fn run_child(&self, step_name: &str) -> Result<()> {
        let child = self.child()?;
        info!(step = step_name, workflow = %child.name, "running sub-workflow");

        let run_result = match child.upload_sources().await {
            Ok(()) => scheduler::run_steps(child).await,
            Err(error) => Err(error),
        };
        let cleanup_failures = child.registries.cleanup(child.api.as_ref()).await;

        let mut errors = ErrorList::new();
        if let Err(error) = run_result {
            errors.add(error);
        }
        errors.extend(cleanup_failures);
        errors.into_result()
    }
}

#[async_trait]
impl StepAction for SubWorkflowStep {
    fn populate(&mut self, workflow: &mut Workflow, step_name: &str) -> Result<()> {
        if self.path.is_empty() {
            return Err(FlowError::invalid_input("SubWorkflow requires a Path"));
        }
        let mut child = workflow.child_workflow(&self.path, &self.vars, step_name, true)?;
        child.populate()?;
        self.workflow = Some(Arc::new(child));
        Ok(())
    }

    fn validate(&self, _workflow: &Workflow, _step_name: &str) -> Result<()> {
        self.child()?.validate()
    }

    async fn run(&self, _workflow: &Workflow, step_name: &str) -> Result<()> {
        self.run_child(step_name).await
    }
}
