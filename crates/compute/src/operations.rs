//! Long-polling of asynchronous compute operations.

use std::fmt::Write as _;
use std::time::Duration;

use gantry_types::Operation;
use tracing::debug;

use crate::{ComputeApi, ComputeError};

/// Delay between polls of a non-terminal operation.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which operations collection an operation belongs to.
#[derive(Debug, Clone, Copy)]
pub enum OperationScope<'a> {
    Zone(&'a str),
    Region(&'a str),
    Global,
}

/// Poll `operation` until it reaches `DONE`.
///
/// `PENDING` and `RUNNING` sleep one second and poll again. A `DONE` status
/// carrying errors fails with a diagnostic listing every error's code and
/// message; any other status value is rejected outright.
pub async fn wait_for_operation(
    api: &dyn ComputeApi,
    project: &str,
    scope: OperationScope<'_>,
    operation: &Operation,
) -> Result<(), ComputeError> {
    wait_with_interval(api, project, scope, &operation.name, POLL_INTERVAL).await
}

pub(crate) async fn wait_with_interval(
    api: &dyn ComputeApi,
    project: &str,
    scope: OperationScope<'_>,
    name: &str,
    interval: Duration,
) -> Result<(), ComputeError> {
    loop {
        let current = match scope {
            OperationScope::Zone(zone) => api.get_zone_operation(project, zone, name).await?,
            OperationScope::Region(region) => api.get_region_operation(project, region, name).await?,
            OperationScope::Global => api.get_global_operation(project, name).await?,
        };

        match current.status.as_str() {
            "PENDING" | "RUNNING" => {
                debug!(operation = name, status = %current.status, "operation not terminal yet");
                tokio::time::sleep(interval).await;
            }
            "DONE" => {
                let Some(error) = current.error.filter(|e| !e.errors.is_empty()) else {
                    return Ok(());
                };
                let mut diagnostic = format!("operation {name} completed with errors:");
                for item in &error.errors {
                    let _ = write!(diagnostic, "\nCode: {}\nMessage: {}", item.code, item.message);
                }
                return Err(ComputeError::OperationFailed { diagnostic });
            }
            other => {
                return Err(ComputeError::UnknownOperationStatus { status: other.to_string() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestComputeService;
    use gantry_types::{OperationError, OperationErrorItem};

    fn op(status: &str) -> Operation {
        Operation {
            name: "op-1".into(),
            status: status.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn waits_through_running_to_done() {
        let api = TestComputeService::new();
        api.script_operation("op-1", op("RUNNING"));
        api.script_operation("op-1", op("RUNNING"));
        api.script_operation("op-1", op("DONE"));

        wait_with_interval(&api, "p", OperationScope::Zone("z"), "op-1", Duration::from_millis(1))
            .await
            .expect("operation reaches DONE");
        assert_eq!(api.operation_polls("op-1"), 3);
    }

    #[tokio::test]
    async fn done_with_errors_reports_each_code_and_message() {
        let api = TestComputeService::new();
        let mut done = op("DONE");
        done.error = Some(OperationError {
            errors: vec![OperationErrorItem {
                code: "QUOTA_EXCEEDED".into(),
                message: "out of CPUS".into(),
                location: None,
            }],
        });
        api.script_operation("op-1", done);

        let error = wait_with_interval(&api, "p", OperationScope::Global, "op-1", Duration::from_millis(1))
            .await
            .expect_err("errors must fail the wait");
        let text = error.to_string();
        assert!(text.contains("Code: QUOTA_EXCEEDED"), "missing code in {text}");
        assert!(text.contains("Message: out of CPUS"), "missing message in {text}");
    }

    #[tokio::test]
    async fn unknown_status_is_rejected() {
        let api = TestComputeService::new();
        api.script_operation("op-1", op("SIDEWAYS"));

        let error = wait_with_interval(&api, "p", OperationScope::Region("r"), "op-1", Duration::from_millis(1))
            .await
            .expect_err("unknown status");
        assert!(matches!(error, ComputeError::UnknownOperationStatus { .. }));
    }
}
