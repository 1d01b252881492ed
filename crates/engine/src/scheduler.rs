//! Dependency-aware concurrent step scheduler.
//!
//! One cooperatively-cancellable task per runnable step, no parallelism cap.
//! A step launches as soon as every predecessor finished successfully. A
//! predecessor failure marks unstarted descendants as skipped and fires the
//! broadcast cancel signal (for fatal errors), but already-running siblings
//! are left to finish; blocking steps observe the signal themselves. Each
//! task runs under the step's timeout and reports a distinguishable
//! `Timeout` error when it trips.

use std::collections::HashMap;
use std::sync::Arc;

use gantry_types::{ErrorList, FlowError, Result};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, warn};

use crate::workflow::Workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
    Ready,
    Running,
    Done,
    Failed,
    Skipped,
}

/// Execute every step of `workflow`, honoring the dependency map.
///
/// Returns the first observed error with the rest folded in; cancelled
/// errors are suppressed when a real failure exists.
pub async fn run_steps(workflow: &Arc<Workflow>) -> Result<()> {
    if workflow.steps.is_empty() {
        return Ok(());
    }

    let mut states: HashMap<String, StepState> = workflow.steps.keys().map(|name| (name.clone(), StepState::Ready)).collect();
    let (report, mut completions) = mpsc::unbounded_channel::<(String, Result<()>)>();
    let mut errors = ErrorList::new();
    let total = workflow.steps.len();
    let mut terminal = 0usize;

    while terminal < total {
        // Launch runnable steps and convert blocked or cancelled ones to
        // skipped, to a fixpoint: each skip can unblock further skips.
        loop {
            let mut changed = false;
            let ready: Vec<String> = states
                .iter()
                .filter(|(_, state)| **state == StepState::Ready)
                .map(|(name, _)| name.clone())
                .collect();
            for name in ready {
                let step = &workflow.steps[&name];
                let blocked = step
                    .depends_on
                    .iter()
                    .any(|dep| matches!(states[dep], StepState::Failed | StepState::Skipped));
                if blocked || workflow.cancel.is_cancelled() {
                    states.insert(name.clone(), StepState::Skipped);
                    terminal += 1;
                    changed = true;
                    info!(step = %workflow.qualified(&name), "step skipped");
                    continue;
                }
                if step.depends_on.iter().all(|dep| states[dep] == StepState::Done) {
                    states.insert(name.clone(), StepState::Running);
                    changed = true;
                    spawn_step(workflow, name, report.clone());
                }
            }
            if !changed {
                break;
            }
        }
        if terminal >= total {
            break;
        }

        let Some((name, result)) = completions.recv().await else {
            break;
        };
        terminal += 1;
        match result {
            Ok(()) => {
                info!(step = %workflow.qualified(&name), "step finished");
                states.insert(name, StepState::Done);
            }
            Err(error) => {
                warn!(step = %workflow.qualified(&name), error = %error, "step failed");
                states.insert(name, StepState::Failed);
                if error.is_fatal() {
                    workflow.cancel.cancel();
                }
                errors.add(error);
            }
        }
    }

    errors.into_result()
}

fn spawn_step(workflow: &Arc<Workflow>, name: String, report: UnboundedSender<(String, Result<()>)>) {
    let workflow = Arc::clone(workflow);
    tokio::spawn(async move {
        let step = &workflow.steps[&name];
        info!(step = %workflow.qualified(&name), kind = step.kind.tag(), "step running");
        let result = match tokio::time::timeout(step.timeout, step.kind.run(&workflow, &name)).await {
            Ok(result) => result.map_err(|error| error.context(format!("step {name:?}"))),
            Err(_) => Err(FlowError::timeout(format!(
                "step {name:?} did not complete within its {:?} timeout",
                step.timeout
            ))),
        };
        let _ = report.send((name, result));
    });
}
