//! `CreateNetworks` step.

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
pub struct CreateNetworksStep(pub Vec<NetworkSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetworkSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    pub auto_create_subnetworks: Option<bool>,
    pub mtu: Option<i64>,
}

impl CreateNetworksStep {
    async fn create_one(&self, workflow: &Workflow, network: &NetworkSpec) -> Result<()> {
        if network.resource.over_write {
            network.resource.delete_existing(workflow, ResourceKind::Network).await?;
        }
        let payload = gantry_types::Network {
            name: network.resource.real_name.clone(),
            auto_create_subnetworks: network.auto_create_subnetworks,
            mtu: network.mtu,
        };
        let operation = workflow.api.create_network(&network.resource.project, &payload).await.map_err(api_err)?;
        network.resource.await_operation(workflow, ResourceKind::Network, &operation).await?;
        info!(network = %network.resource.real_name, "created network");
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateNetworksStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for network in &mut self.0 {
            network.resource.populate(workflow, ResourceKind::Network);
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("CreateNetworks requires at least one network"));
        }
        let step_id = workflow.qualified(step_name);
        for network in &self.0 {
            network.resource.validate_and_register(workflow, ResourceKind::Network, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|network| self.create_one(workflow, network))).await?;
        Ok(())
    }
}
