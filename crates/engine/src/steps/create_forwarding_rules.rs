//! `CreateForwardingRules` step.

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
pub struct CreateForwardingRulesStep(pub Vec<ForwardingRuleSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ForwardingRuleSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    /// Target instance to forward to: a workflow name or a link.
    pub target_instance: String,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    pub port_range: String,
}

impl CreateForwardingRulesStep {
    async fn create_one(&self, workflow: &Workflow, rule: &ForwardingRuleSpec) -> Result<()> {
        if rule.resource.over_write {
            rule.resource.delete_existing(workflow, ResourceKind::ForwardingRule).await?;
        }

        let payload = gantry_types::ForwardingRule {
            name: rule.resource.real_name.clone(),
            region: rule.resource.region.clone(),
            ip_address: rule.ip_address.clone(),
            ip_protocol: if rule.ip_protocol.is_empty() {
                "TCP".into()
            } else {
                rule.ip_protocol.clone()
            },
            port_range: rule.port_range.clone(),
            target: workflow
                .registries
                .resolve(ResourceKind::TargetInstance, &rule.target_instance, &rule.resource.project, &workflow.zone)
                .link,
        };
        let operation = workflow
            .api
            .create_forwarding_rule(&rule.resource.project, &rule.resource.region, &payload)
            .await
            .map_err(api_err)?;
        rule.resource.await_operation(workflow, ResourceKind::ForwardingRule, &operation).await?;
        info!(forwarding_rule = %rule.resource.real_name, "created forwarding rule");
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateForwardingRulesStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for rule in &mut self.0 {
            rule.resource.populate(workflow, ResourceKind::ForwardingRule);
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("CreateForwardingRules requires at least one forwarding rule"));
        }
        let step_id = workflow.qualified(step_name);
        for rule in &self.0 {
            if rule.target_instance.is_empty() {
                return Err(FlowError::invalid_input(format!(
                    "forwarding rule {:?} is missing a TargetInstance",
                    rule.resource.name
                )));
            }
            workflow
                .registries
                .use_resource(ResourceKind::TargetInstance, &rule.target_instance, &step_id)?;
            rule.resource.validate_and_register(workflow, ResourceKind::ForwardingRule, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|rule| self.create_one(workflow, rule))).await?;
        Ok(())
    }
}
