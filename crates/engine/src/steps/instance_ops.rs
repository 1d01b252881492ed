//! Instance state steps: `StartInstances`, `StopInstances`, `Suspend`,
//! `Resume` and `SetMachineType`.
//!
//! The singular steps (`Suspend`, `Resume`, `SetMachineType`) default their
//! `Project`/`Zone` from the workflow during populate without overwriting
//! explicit values.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_compute::{OperationScope, wait_for_operation};
use gantry_types::{FlowError, Result};
use gantry_util::links::templates;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ResourceKind;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Copy)]
enum InstanceCall {
    Start,
    Stop,
    Suspend,
    Resume,
}

impl InstanceCall {
    fn verb(&self) -> &'static str {
        match self {
            InstanceCall::Start => "started",
            InstanceCall::Stop => "stopped",
            InstanceCall::Suspend => "suspended",
            InstanceCall::Resume => "resumed",
        }
    }
}

async fn run_instance_call(workflow: &Workflow, call: InstanceCall, reference: &str, project: &str, zone: &str) -> Result<()> {
    let instance = workflow.registries.resolve(ResourceKind::Instance, reference, project, zone);
    let api = workflow.api.as_ref();
    let operation = match call {
        InstanceCall::Start => api.start_instance(&instance.project, &instance.locus, &instance.name).await,
        InstanceCall::Stop => api.stop_instance(&instance.project, &instance.locus, &instance.name).await,
        InstanceCall::Suspend => api.suspend_instance(&instance.project, &instance.locus, &instance.name).await,
        InstanceCall::Resume => api.resume_instance(&instance.project, &instance.locus, &instance.name).await,
    }
    .map_err(api_err)?;
    wait_for_operation(api, &instance.project, OperationScope::Zone(&instance.locus), &operation)
        .await
        .map_err(api_err)?;
    info!(instance = %instance.name, "{} instance", call.verb());
    Ok(())
}

/// Payload shared by the singular instance-state steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceTarget {
    pub instance: String,
    pub project: String,
    pub zone: String,
}

impl InstanceTarget {
    fn populate(&mut self, workflow: &Workflow) {
        if self.project.is_empty() {
            self.project = workflow.project.clone();
        }
        if self.zone.is_empty() {
            self.zone = workflow.zone.clone();
        }
    }

    fn validate(&self, workflow: &Workflow, step_id: &str, what: &str) -> Result<()> {
        if self.project.is_empty() {
            return Err(FlowError::invalid_input(format!("{what} requires a Project")));
        }
        if self.zone.is_empty() {
            return Err(FlowError::invalid_input(format!("{what} requires a Zone")));
        }
        if self.instance.is_empty() {
            return Err(FlowError::invalid_input(format!("{what} requires an Instance")));
        }
        workflow.registries.use_resource(ResourceKind::Instance, &self.instance, step_id)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuspendStep(pub InstanceTarget);

#[async_trait]
impl StepAction for SuspendStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        self.0.populate(workflow);
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        self.0.validate(workflow, &workflow.qualified(step_name), "Suspend")
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        run_instance_call(workflow, InstanceCall::Suspend, &self.0.instance, &self.0.project, &self.0.zone).await
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeStep(pub InstanceTarget);

#[async_trait]
impl StepAction for ResumeStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        self.0.populate(workflow);
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        self.0.validate(workflow, &workflow.qualified(step_name), "Resume")
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        run_instance_call(workflow, InstanceCall::Resume, &self.0.instance, &self.0.project, &self.0.zone).await
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SetMachineTypeStep {
    #[serde(flatten)]
    pub target: InstanceTarget,
    pub machine_type: String,
}

#[async_trait]
impl StepAction for SetMachineTypeStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        self.target.populate(workflow);
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        self.target.validate(workflow, &workflow.qualified(step_name), "SetMachineType")?;
        if self.machine_type.is_empty() {
            return Err(FlowError::invalid_input("SetMachineType requires a MachineType"));
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        let instance = workflow
            .registries
            .resolve(ResourceKind::Instance, &self.target.instance, &self.target.project, &self.target.zone);
        // A bare machine type name expands onto the instance's placement.
        let machine_type = templates::MACHINE_TYPE.extend(&self.machine_type, &instance.project, &instance.locus);
        let operation = workflow
            .api
            .set_machine_type(&instance.project, &instance.locus, &instance.name, &machine_type)
            .await
            .map_err(api_err)?;
        wait_for_operation(
            workflow.api.as_ref(),
            &instance.project,
            OperationScope::Zone(&instance.locus),
            &operation,
        )
        .await
        .map_err(api_err)?;
        info!(instance = %instance.name, machine_type = %machine_type, "set machine type");
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StartInstancesStep(pub Vec<String>);

#[async_trait]
impl StepAction for StartInstancesStep {
    fn populate(&mut self, _workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        validate_instance_list(workflow, step_name, &self.0, "StartInstances")
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(
            self.0
                .iter()
                .map(|reference| run_instance_call(workflow, InstanceCall::Start, reference, &workflow.project, &workflow.zone)),
        )
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StopInstancesStep(pub Vec<String>);

#[async_trait]
impl StepAction for StopInstancesStep {
    fn populate(&mut self, _workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        validate_instance_list(workflow, step_name, &self.0, "StopInstances")
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(
            self.0
                .iter()
                .map(|reference| run_instance_call(workflow, InstanceCall::Stop, reference, &workflow.project, &workflow.zone)),
        )
        .await?;
        Ok(())
    }
}

fn validate_instance_list(workflow: &Workflow, step_name: &str, instances: &[String], what: &str) -> Result<()> {
    if instances.is_empty() {
        return Err(FlowError::invalid_input(format!("{what} requires at least one instance")));
    }
    let step_id = workflow.qualified(step_name);
    for reference in instances {
        workflow.registries.use_resource(ResourceKind::Instance, reference, &step_id)?;
    }
    Ok(())
}
