//! `CreateTargetInstances` step.

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
pub struct CreateTargetInstancesStep(pub Vec<TargetInstanceSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TargetInstanceSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    /// Instance receiving the traffic: a workflow instance name or a link.
    pub instance: String,
    pub nat_policy: String,
}

impl CreateTargetInstancesStep {
    async fn create_one(&self, workflow: &Workflow, target: &TargetInstanceSpec) -> Result<()> {
        if target.resource.over_write {
            target.resource.delete_existing(workflow, ResourceKind::TargetInstance).await?;
        }

        let payload = gantry_types::TargetInstance {
            name: target.resource.real_name.clone(),
            zone: target.resource.zone.clone(),
            instance: workflow
                .registries
                .resolve(ResourceKind::Instance, &target.instance, &target.resource.project, &target.resource.zone)
                .link,
            nat_policy: if target.nat_policy.is_empty() {
                "NO_NAT".into()
            } else {
                target.nat_policy.clone()
            },
        };
        let operation = workflow
            .api
            .create_target_instance(&target.resource.project, &target.resource.zone, &payload)
            .await
            .map_err(api_err)?;
        target.resource.await_operation(workflow, ResourceKind::TargetInstance, &operation).await?;
        info!(target_instance = %target.resource.real_name, "created target instance");
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateTargetInstancesStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for target in &mut self.0 {
            target.resource.populate(workflow, ResourceKind::TargetInstance);
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("CreateTargetInstances requires at least one target instance"));
        }
        let step_id = workflow.qualified(step_name);
        for target in &self.0 {
            if target.instance.is_empty() {
                return Err(FlowError::invalid_input(format!(
                    "target instance {:?} is missing an Instance",
                    target.resource.name
                )));
            }
            workflow.registries.use_resource(ResourceKind::Instance, &target.instance, &step_id)?;
            target.resource.validate_and_register(workflow, ResourceKind::TargetInstance, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|target| self.create_one(workflow, target))).await?;
        Ok(())
    }
}
