//! Compute API client utilities for the Gantry workflow engine.
//!
//! This crate owns the seam between the engine and the cloud: the
//! [`ComputeApi`] trait is the only thing the engine core depends on. The
//! production implementation ([`rest::RestComputeService`]) wraps the REST
//! API with a validated base URL and bearer auth; tests inject
//! [`testing::TestComputeService`] instead.
//!
//! Cross-cutting behavior lives next to the trait:
//!
//! - [`retry`] wraps individual calls with the transient-error retry policy
//! - [`operations`] long-polls asynchronous operations until terminal status

use async_trait::async_trait;
use gantry_types::{
    AttachedDisk, DeprecationStatus, Disk, ForwardingRule, Image, Instance, MachineImage, Metadata, Network, Operation, Region,
    SerialPortOutput, Snapshot, Subnetwork, TargetInstance,
};

pub mod error;
pub mod operations;
pub mod rest;
pub mod retry;
pub mod testing;

pub use error::ComputeError;
pub use operations::{OperationScope, wait_for_operation};
pub use rest::RestComputeService;
pub use retry::RetryPolicy;
pub use testing::TestComputeService;

/// Abstract interface for every compute API interaction the engine performs.
///
/// Mutating methods return the [`Operation`] the API started; callers chain
/// through [`wait_for_operation`] when they need the effect to be visible.
/// Implementations must be safe to share across concurrently running steps.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    // Disks
    async fn create_disk(&self, project: &str, zone: &str, disk: &Disk) -> Result<Operation, ComputeError>;
    async fn delete_disk(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn attach_disk(&self, project: &str, zone: &str, instance: &str, disk: &AttachedDisk) -> Result<Operation, ComputeError>;
    async fn detach_disk(&self, project: &str, zone: &str, instance: &str, device_name: &str) -> Result<Operation, ComputeError>;

    // Images
    async fn create_image(&self, project: &str, image: &Image) -> Result<Operation, ComputeError>;
    async fn delete_image(&self, project: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn deprecate_image(&self, project: &str, name: &str, status: &DeprecationStatus) -> Result<Operation, ComputeError>;
    async fn create_machine_image(&self, project: &str, machine_image: &MachineImage) -> Result<Operation, ComputeError>;
    async fn delete_machine_image(&self, project: &str, name: &str) -> Result<Operation, ComputeError>;

    // Snapshots
    async fn create_snapshot(&self, project: &str, zone: &str, disk: &str, snapshot: &Snapshot) -> Result<Operation, ComputeError>;
    async fn delete_snapshot(&self, project: &str, name: &str) -> Result<Operation, ComputeError>;

    // Instances
    async fn create_instance(&self, project: &str, zone: &str, instance: &Instance) -> Result<Operation, ComputeError>;
    async fn delete_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn start_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn stop_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn suspend_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn resume_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn set_machine_type(&self, project: &str, zone: &str, instance: &str, machine_type: &str) -> Result<Operation, ComputeError>;
    async fn set_instance_metadata(&self, project: &str, zone: &str, instance: &str, metadata: &Metadata)
    -> Result<Operation, ComputeError>;
    async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Instance, ComputeError>;
    async fn get_serial_port_output(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        port: i64,
        start: i64,
    ) -> Result<SerialPortOutput, ComputeError>;

    // Networking
    async fn create_network(&self, project: &str, network: &Network) -> Result<Operation, ComputeError>;
    async fn delete_network(&self, project: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn create_subnetwork(&self, project: &str, region: &str, subnetwork: &Subnetwork) -> Result<Operation, ComputeError>;
    async fn delete_subnetwork(&self, project: &str, region: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn create_target_instance(&self, project: &str, zone: &str, target: &TargetInstance) -> Result<Operation, ComputeError>;
    async fn delete_target_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn create_forwarding_rule(&self, project: &str, region: &str, rule: &ForwardingRule) -> Result<Operation, ComputeError>;
    async fn delete_forwarding_rule(&self, project: &str, region: &str, name: &str) -> Result<Operation, ComputeError>;

    // Project/region state
    async fn get_region(&self, project: &str, region: &str) -> Result<Region, ComputeError>;

    // Operation polling
    async fn get_zone_operation(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn get_region_operation(&self, project: &str, region: &str, name: &str) -> Result<Operation, ComputeError>;
    async fn get_global_operation(&self, project: &str, name: &str) -> Result<Operation, ComputeError>;
}
