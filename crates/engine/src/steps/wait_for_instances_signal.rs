//! `WaitForInstancesSignal` step.
//!
//! Watches instances for signals: a success/failure/status match appearing
//! on a serial port, or the instance reaching a stopped state. All listed
//! instances must signal before the step completes; a failure match fails
//! the step immediately. The poll loop selects on the workflow cancel
//! signal and ends quietly when it fires.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{ErrorKind, FlowError, Result};
use gantry_util::duration::parse_duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::registry::ResourceKind;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

/// Poll cadence when the document does not set one.
const DEFAULT_INTERVAL: &str = "5s";
/// Instance states treated as stopped.
const STOPPED_STATES: &[&str] = &["STOPPED", "STOPPING", "TERMINATED"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitForInstancesSignalStep(pub Vec<InstanceSignalSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceSignalSpec {
    /// Instance to watch: a workflow instance name or an instance link.
    pub name: String,
    /// Poll interval as a duration string.
    pub interval: String,
    /// Signal when the instance stops.
    pub stopped: bool,
    pub serial_output: Option<SerialOutputSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SerialOutputSpec {
    pub port: i64,
    pub success_match: String,
    pub failure_match: String,
    pub status_match: String,
}

impl InstanceSignalSpec {
    fn interval(&self) -> Result<Duration> {
        let interval = parse_duration(&self.interval).map_err(|e| FlowError::invalid_input(format!("Interval: {e}")).with_source(e))?;
        if interval.is_zero() {
            return Err(FlowError::invalid_input("Interval must be positive"));
        }
        Ok(interval)
    }
}

impl WaitForInstancesSignalStep {
    async fn wait_one(&self, workflow: &Workflow, spec: &InstanceSignalSpec) -> Result<()> {
        let instance = workflow
            .registries
            .resolve(ResourceKind::Instance, &spec.name, &workflow.project, &workflow.zone);
        let mut ticker = tokio::time::interval(spec.interval()?);
        let mut offset: i64 = 0;

        loop {
            tokio::select! {
                _ = workflow.cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            if let Some(serial) = &spec.serial_output {
                let port = serial.port.max(1);
                match workflow
                    .api
                    .get_serial_port_output(&instance.project, &instance.locus, &instance.name, port, offset)
                    .await
                {
                    Ok(output) => {
                        offset = output.next;
                        if !serial.status_match.is_empty() {
                            for line in output.contents.lines().filter(|l| l.contains(&serial.status_match)) {
                                info!(instance = %instance.name, status = line, "instance status");
                            }
                        }
                        if !serial.failure_match.is_empty() && output.contents.contains(&serial.failure_match) {
                            return Err(FlowError::new(
                                ErrorKind::Api,
                                format!(
                                    "instance {:?} reported failure match {:?} on serial port {port}",
                                    instance.name, serial.failure_match
                                ),
                            ));
                        }
                        if !serial.success_match.is_empty() && output.contents.contains(&serial.success_match) {
                            info!(instance = %instance.name, "instance signaled success");
                            return Ok(());
                        }
                    }
                    // Serial reads flake while instances reboot; keep polling.
                    Err(error) => debug!(instance = %instance.name, error = %error, "serial port read failed"),
                }
            }

            if spec.stopped {
                let current = workflow
                    .api
                    .get_instance(&instance.project, &instance.locus, &instance.name)
                    .await
                    .map_err(api_err)?;
                if STOPPED_STATES.contains(&current.status.as_str()) {
                    info!(instance = %instance.name, status = %current.status, "instance stopped");
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl StepAction for WaitForInstancesSignalStep {
    fn populate(&mut self, _workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for spec in &mut self.0 {
            if spec.interval.is_empty() {
                spec.interval = DEFAULT_INTERVAL.into();
            }
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("WaitForInstancesSignal requires at least one instance"));
        }
        let step_id = workflow.qualified(step_name);
        for spec in &self.0 {
            if spec.name.is_empty() {
                return Err(FlowError::invalid_input("signal entry is missing an instance Name"));
            }
            spec.interval()?;
            if !spec.stopped && spec.serial_output.is_none() {
                return Err(FlowError::invalid_input(format!(
                    "signal for {:?} watches nothing; set Stopped or SerialOutput",
                    spec.name
                )));
            }
            if let Some(serial) = &spec.serial_output
                && serial.success_match.is_empty()
                && serial.failure_match.is_empty()
                && serial.status_match.is_empty()
            {
                return Err(FlowError::invalid_input(format!(
                    "serial output watch for {:?} defines no match",
                    spec.name
                )));
            }
            workflow.registries.use_resource(ResourceKind::Instance, &spec.name, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|spec| self.wait_one(workflow, spec))).await?;
        Ok(())
    }
}
