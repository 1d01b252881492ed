//! `IncludeWorkflow` step.
//!
//! The included document is parsed and linked as a child that shares the
//! parent's run id, cancel signal and resource registries; its sources merge
//! into the parent's staging set. Bridge edges stitch the child's steps into
//! the shared dependency graph: every child step inherits the include step's
//! predecessors, and the include step completes only after every child step.

use async_trait::async_trait;
use gantry_types::{FlowError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::scheduler;
use crate::sources::is_gcs_path;
use crate::steps::StepAction;
use crate::workflow::Workflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IncludeWorkflowStep {
    /// Document path, relative to the parent workflow's directory.
    pub path: String,
    /// Variable bindings passed through to the child.
    pub vars: IndexMap<String, String>,
    #[serde(skip)]
    pub workflow: Option<Arc<Workflow>>,
}

impl IncludeWorkflowStep {
    pub(crate) fn child(&self) -> Result<&Arc<Workflow>> {
        self.workflow
            .as_ref()
            .ok_or_else(|| FlowError::invalid_input("included workflow was not populated"))
    }
}

#[async_trait]
impl StepAction for IncludeWorkflowStep {
    fn populate(&mut self, workflow: &mut Workflow, step_name: &str) -> Result<()> {
        if self.path.is_empty() {
            return Err(FlowError::invalid_input("IncludeWorkflow requires a Path"));
        }
        let mut child = workflow.child_workflow(&self.path, &self.vars, step_name, false)?;
        child.populate()?;

        // The child's sources stage under the parent's prefix; origins are
        // absolutized so they resolve independent of either directory.
        for (key, origin) in &child.sources {
            let origin = if is_gcs_path(origin) {
                origin.clone()
            } else {
                child.workflow_dir.join(origin).display().to_string()
            };
            if let Some(existing) = workflow.sources.get(key)
                && *existing != origin
            {
                return Err(FlowError::invalid_input(format!(
                    "included workflow source {key:?} conflicts with an existing source"
                )));
            }
            workflow.sources.insert(key.clone(), origin);
        }

        self.workflow = Some(Arc::new(child));
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        let child = self.child()?;
        child.register_graph();
        {
            let mut graph = workflow.registries.graph.lock().expect("dependency graph lock poisoned");
            let include_id = workflow.qualified(step_name);
            let parent_preds: Vec<String> = workflow
                .steps
                .get(step_name)
                .map(|step| step.depends_on.iter().map(|d| workflow.qualified(d)).collect())
                .unwrap_or_default();
            for child_name in child.steps.keys() {
                let child_id = child.qualified(child_name);
                graph.add_edge(&include_id, &child_id);
                for pred in &parent_preds {
                    graph.add_edge(&child_id, pred);
                }
            }
        }
        child.validate()
    }

    async fn run(&self, _workflow: &Workflow, step_name: &str) -> Result<()> {
        let child = self.child()?;
        info!(step = step_name, workflow = %child.name, "running included workflow");
        scheduler::run_steps(child).await
    }
}
