//! `CreateSubnetworks` step.

use std::net::IpAddr;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{FlowError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ResourceKind;
use crate::steps::resource::ResourceSpec;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

const STACK_IPV4_ONLY: &str = "IPV4_ONLY";
const STACK_IPV4_IPV6: &str = "IPV4_IPV6";
const STACK_IPV6_ONLY: &str = "IPV6_ONLY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateSubnetworksStep(pub Vec<SubnetworkSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SubnetworkSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    /// Parent network: a workflow network name or a network link.
    pub network: String,
    pub ip_cidr_range: String,
    /// One of `IPV4_ONLY`, `IPV4_IPV6`, `IPV6_ONLY`; defaults to IPv4-only.
    pub stack_type: String,
    /// One of `INTERNAL`, `EXTERNAL`; mandatory when IPv6 is active.
    pub ipv6_access_type: String,
    pub internal_ipv6_prefix: String,
    pub external_ipv6_prefix: String,
}

fn parse_cidr(value: &str) -> Option<(IpAddr, u8)> {
    let (address, prefix) = value.split_once('/')?;
    let address: IpAddr = address.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if address.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((address, prefix))
}

impl SubnetworkSpec {
    fn ipv4_active(&self) -> bool {
        matches!(self.stack_type.as_str(), "" | STACK_IPV4_ONLY | STACK_IPV4_IPV6)
    }

    fn ipv6_active(&self) -> bool {
        matches!(self.stack_type.as_str(), STACK_IPV4_IPV6 | STACK_IPV6_ONLY)
    }

    fn validate_stack(&self) -> Result<()> {
        let name = &self.resource.name;
        match self.stack_type.as_str() {
            "" | STACK_IPV4_ONLY | STACK_IPV4_IPV6 | STACK_IPV6_ONLY => {}
            other => {
                return Err(FlowError::invalid_input(format!(
                    "subnetwork {name:?} has invalid StackType {other:?}; expected IPV4_ONLY, IPV4_IPV6 or IPV6_ONLY"
                )));
            }
        }

        if self.ipv4_active() {
            if self.ip_cidr_range.is_empty() {
                return Err(FlowError::invalid_input(format!("subnetwork {name:?} is missing an IpCidrRange")));
            }
            match parse_cidr(&self.ip_cidr_range) {
                Some((IpAddr::V4(_), _)) => {}
                _ => {
                    return Err(FlowError::invalid_input(format!(
                        "subnetwork {name:?} IpCidrRange {:?} is not a valid IPv4 CIDR range",
                        self.ip_cidr_range
                    )));
                }
            }
        }

        if self.ipv6_active() {
            match self.ipv6_access_type.as_str() {
                "INTERNAL" | "EXTERNAL" => {}
                "" => {
                    return Err(FlowError::invalid_input(format!(
                        "subnetwork {name:?} with an IPv6 stack requires an Ipv6AccessType"
                    )));
                }
                other => {
                    return Err(FlowError::invalid_input(format!(
                        "subnetwork {name:?} has invalid Ipv6AccessType {other:?}; expected INTERNAL or EXTERNAL"
                    )));
                }
            }
            for prefix in [&self.internal_ipv6_prefix, &self.external_ipv6_prefix] {
                if prefix.is_empty() {
                    continue;
                }
                match parse_cidr(prefix) {
                    Some((IpAddr::V6(_), _)) => {}
                    _ => {
                        return Err(FlowError::invalid_input(format!(
                            "subnetwork {name:?} IPv6 prefix {prefix:?} is not a valid IPv6 CIDR range"
                        )));
                    }
                }
            }
        }

        if self.stack_type == STACK_IPV6_ONLY && !self.ip_cidr_range.is_empty() {
            return Err(FlowError::invalid_input(format!(
                "subnetwork {name:?}: IPv6-only subnetworks must not have an IPv4 CIDR range"
            )));
        }

        Ok(())
    }
}

impl CreateSubnetworksStep {
    async fn create_one(&self, workflow: &Workflow, subnetwork: &SubnetworkSpec) -> Result<()> {
        if subnetwork.resource.over_write {
            subnetwork.resource.delete_existing(workflow, ResourceKind::Subnetwork).await?;
        }

        let payload = gantry_types::Subnetwork {
            name: subnetwork.resource.real_name.clone(),
            region: subnetwork.resource.region.clone(),
            network: workflow
                .registries
                .resolve(ResourceKind::Network, &subnetwork.network, &subnetwork.resource.project, "")
                .link,
            ip_cidr_range: subnetwork.ip_cidr_range.clone(),
            stack_type: if subnetwork.stack_type.is_empty() {
                STACK_IPV4_ONLY.to_string()
            } else {
                subnetwork.stack_type.clone()
            },
            ipv6_access_type: subnetwork.ipv6_access_type.clone(),
            internal_ipv6_prefix: subnetwork.internal_ipv6_prefix.clone(),
            external_ipv6_prefix: subnetwork.external_ipv6_prefix.clone(),
        };

        let operation = workflow
            .api
            .create_subnetwork(&subnetwork.resource.project, &subnetwork.resource.region, &payload)
            .await
            .map_err(api_err)?;
        subnetwork.resource.await_operation(workflow, ResourceKind::Subnetwork, &operation).await?;
        info!(subnetwork = %subnetwork.resource.real_name, region = %subnetwork.resource.region, "created subnetwork");
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateSubnetworksStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for subnetwork in &mut self.0 {
            subnetwork.resource.populate(workflow, ResourceKind::Subnetwork);
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("CreateSubnetworks requires at least one subnetwork"));
        }
        let step_id = workflow.qualified(step_name);
        for subnetwork in &self.0 {
            if subnetwork.network.is_empty() {
                return Err(FlowError::invalid_input(format!(
                    "subnetwork {:?} is missing a Network",
                    subnetwork.resource.name
                )));
            }
            subnetwork.validate_stack()?;
            workflow.registries.use_resource(ResourceKind::Network, &subnetwork.network, &step_id)?;
            subnetwork.resource.validate_and_register(workflow, ResourceKind::Subnetwork, &step_id)?;
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|subnetwork| self.create_one(workflow, subnetwork))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(stack_type: &str, cidr: &str, access: &str) -> SubnetworkSpec {
        SubnetworkSpec {
            resource: ResourceSpec {
                name: "sn".into(),
                ..Default::default()
            },
            network: "default".into(),
            ip_cidr_range: cidr.into(),
            stack_type: stack_type.into(),
            ipv6_access_type: access.into(),
            ..Default::default()
        }
    }

    #[test]
    fn default_stack_is_ipv4_and_requires_cidr() {
        assert!(spec("", "10.0.0.0/24", "").validate_stack().is_ok());
        let error = spec("", "", "").validate_stack().unwrap_err();
        assert!(error.to_string().contains("IpCidrRange"));
    }

    #[test]
    fn rejects_unknown_stack_type() {
        let error = spec("DUAL", "10.0.0.0/24", "").validate_stack().unwrap_err();
        assert!(error.to_string().contains("StackType"));
    }

    #[test]
    fn ipv4_cidr_must_parse() {
        assert!(spec(STACK_IPV4_ONLY, "10.0.0.0/33", "").validate_stack().is_err());
        assert!(spec(STACK_IPV4_ONLY, "fd00::/64", "").validate_stack().is_err());
    }

    #[test]
    fn dual_stack_requires_access_type() {
        let error = spec(STACK_IPV4_IPV6, "10.0.0.0/24", "").validate_stack().unwrap_err();
        assert!(error.to_string().contains("Ipv6AccessType"));
        assert!(spec(STACK_IPV4_IPV6, "10.0.0.0/24", "EXTERNAL").validate_stack().is_ok());
    }

    #[test]
    fn ipv6_only_forbids_ipv4_cidr() {
        let error = spec(STACK_IPV6_ONLY, "10.0.0.0/24", "INTERNAL").validate_stack().unwrap_err();
        assert!(
            error.to_string().contains("IPv6-only subnetworks must not have an IPv4 CIDR range"),
            "unexpected message: {error}"
        );
        assert!(spec(STACK_IPV6_ONLY, "", "INTERNAL").validate_stack().is_ok());
    }

    #[test]
    fn ipv6_prefixes_must_be_ipv6_cidrs() {
        let mut subnetwork = spec(STACK_IPV6_ONLY, "", "INTERNAL");
        subnetwork.internal_ipv6_prefix = "fd20:1:2::/64".into();
        assert!(subnetwork.validate_stack().is_ok());
        subnetwork.internal_ipv6_prefix = "10.0.0.0/24".into();
        assert!(subnetwork.validate_stack().is_err());
    }
}
