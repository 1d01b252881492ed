//! `CreateInstances` step.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use gantry_types::{AccessConfig, AttachedDisk, FlowError, Metadata, NetworkInterface, Result};
use gantry_util::links::templates;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ResourceKind;
use crate::steps::resource::ResourceSpec;
use crate::steps::{StepAction, api_err};
use crate::workflow::Workflow;

/// Machine type used when the document does not pick one.
const DEFAULT_MACHINE_TYPE: &str = "n1-standard-1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateInstancesStep(pub Vec<InstanceSpec>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    /// Disks to attach at creation; the first entry boots the instance.
    pub disks: Vec<InstanceDiskSpec>,
    pub machine_type: String,
    pub network_interfaces: Vec<InterfaceSpec>,
    pub metadata: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceDiskSpec {
    /// Workflow disk name or disk link.
    pub source: String,
    pub device_name: String,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InterfaceSpec {
    /// Workflow network name or network link; defaults to `default`.
    pub network: String,
    /// Workflow subnetwork name or subnetwork link.
    pub subnetwork: String,
    /// Attach an external address when set.
    pub external_ip: bool,
}

impl CreateInstancesStep {
    async fn create_one(&self, workflow: &Workflow, instance: &InstanceSpec) -> Result<()> {
        if instance.resource.over_write {
            instance.resource.delete_existing(workflow, ResourceKind::Instance).await?;
        }

        let project = &instance.resource.project;
        let disks = instance
            .disks
            .iter()
            .enumerate()
            .map(|(index, disk)| AttachedDisk {
                source: workflow.registries.resolve(ResourceKind::Disk, &disk.source, project, &instance.resource.zone).link,
                boot: index == 0,
                auto_delete: disk.auto_delete,
                device_name: disk.device_name.clone(),
                mode: "READ_WRITE".into(),
            })
            .collect();

        let network_interfaces = instance
            .network_interfaces
            .iter()
            .map(|interface| {
                let mut converted = NetworkInterface {
                    network: workflow.registries.resolve(ResourceKind::Network, &interface.network, project, "").link,
                    ..Default::default()
                };
                if !interface.subnetwork.is_empty() {
                    converted.subnetwork = workflow
                        .registries
                        .resolve(ResourceKind::Subnetwork, &interface.subnetwork, project, &workflow.region)
                        .link;
                }
                if interface.external_ip {
                    converted.access_configs.push(AccessConfig {
                        config_type: "ONE_TO_ONE_NAT".into(),
                        name: "External NAT".into(),
                    });
                }
                converted
            })
            .collect();

        let mut metadata = Metadata::default();
        for (key, value) in &instance.metadata {
            metadata.set(key, value);
        }
        if !workflow.sources_path.is_empty() {
            metadata.set("gantry-sources-path", &workflow.sources_path);
            metadata.set("gantry-logs-path", &workflow.logs_path);
            metadata.set("gantry-outs-path", &workflow.outs_path);
        }

        let payload = gantry_types::Instance {
            name: instance.resource.real_name.clone(),
            zone: instance.resource.zone.clone(),
            machine_type: instance.machine_type.clone(),
            disks,
            network_interfaces,
            metadata: Some(metadata),
            ..Default::default()
        };

        let operation = workflow
            .api
            .create_instance(project, &instance.resource.zone, &payload)
            .await
            .map_err(api_err)?;
        instance.resource.await_operation(workflow, ResourceKind::Instance, &operation).await?;
        info!(instance = %instance.resource.real_name, zone = %instance.resource.zone, "created instance");
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateInstancesStep {
    fn populate(&mut self, workflow: &mut Workflow, _step_name: &str) -> Result<()> {
        for instance in &mut self.0 {
            instance.resource.populate(workflow, ResourceKind::Instance);
            if instance.machine_type.is_empty() {
                instance.machine_type = DEFAULT_MACHINE_TYPE.into();
            }
            instance.machine_type = templates::MACHINE_TYPE.extend(&instance.machine_type, &instance.resource.project, &instance.resource.zone);
            if instance.network_interfaces.is_empty() {
                instance.network_interfaces.push(InterfaceSpec {
                    network: templates::NETWORK.link(&instance.resource.project, "", "default"),
                    ..Default::default()
                });
            }
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(FlowError::invalid_input("CreateInstances requires at least one instance"));
        }
        let step_id = workflow.qualified(step_name);
        for instance in &self.0 {
            if instance.disks.is_empty() {
                return Err(FlowError::invalid_input(format!(
                    "instance {:?} requires at least one disk",
                    instance.resource.name
                )));
            }
            instance.resource.validate_and_register(workflow, ResourceKind::Instance, &step_id)?;
            let project = &instance.resource.project;
            for disk in &instance.disks {
                let disk_link = workflow.registries.use_resource(ResourceKind::Disk, &disk.source, &step_id)?;
                workflow
                    .registries
                    .connect(&workflow.registries.disk_attachments, &disk_link, &instance.resource.link, &step_id)?;
            }
            for interface in &instance.network_interfaces {
                workflow.registries.use_resource(ResourceKind::Network, &interface.network, &step_id)?;
                if !interface.subnetwork.is_empty() {
                    workflow.registries.use_resource(ResourceKind::Subnetwork, &interface.subnetwork, &step_id)?;
                    let subnetwork_link = workflow
                        .registries
                        .resolve(ResourceKind::Subnetwork, &interface.subnetwork, project, &workflow.region)
                        .link;
                    workflow.registries.connect(
                        &workflow.registries.subnetwork_connections,
                        &instance.resource.link,
                        &subnetwork_link,
                        &step_id,
                    )?;
                }
            }
        }
        Ok(())
    }

    async fn run(&self, workflow: &Workflow, _step_name: &str) -> Result<()> {
        try_join_all(self.0.iter().map(|instance| self.create_one(workflow, instance))).await?;
        Ok(())
    }
}
