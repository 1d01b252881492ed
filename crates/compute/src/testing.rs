//! In-memory [`ComputeApi`] double for tests.
//!
//! Ships in the library (not behind `cfg(test)`) so downstream crates can
//! drive whole workflows without a cloud project. Every call is recorded;
//! failures and operation states can be scripted per method or per operation
//! name.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use gantry_types::{
    AttachedDisk, DeprecationStatus, Disk, ForwardingRule, Image, Instance, MachineImage, Metadata, Network, Operation, Region,
    SerialPortOutput, Snapshot, Subnetwork, TargetInstance,
};

use crate::{ComputeApi, ComputeError};

/// One recorded API call: method identifier plus the primary target name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub method: String,
    pub target: String,
}

#[derive(Default)]
struct Inner {
    calls: Vec<CallRecord>,
    failures: HashMap<String, VecDeque<ComputeError>>,
    operations: HashMap<String, VecDeque<Operation>>,
    operation_polls: HashMap<String, u32>,
    regions: HashMap<String, Region>,
    instances: HashMap<String, Instance>,
    serial: HashMap<String, VecDeque<SerialPortOutput>>,
    op_counter: u64,
}

/// Scriptable in-memory compute service.
#[derive(Default)]
pub struct TestComputeService {
    inner: Mutex<Inner>,
}

impl TestComputeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `error` as the next result of `method` (e.g. `"disks.insert"`).
    pub fn fail_next(&self, method: &str, error: ComputeError) {
        let mut inner = self.inner.lock().expect("test compute state lock poisoned");
        inner.failures.entry(method.to_string()).or_default().push_back(error);
    }

    /// Queue a state an operation getter will report for `name`. Once the
    /// queue drains, getters report `DONE`.
    pub fn script_operation(&self, name: &str, operation: Operation) {
        let mut inner = self.inner.lock().expect("test compute state lock poisoned");
        inner.operations.entry(name.to_string()).or_default().push_back(operation);
    }

    /// Configure the region returned by `get_region`.
    pub fn set_region(&self, region: Region) {
        let mut inner = self.inner.lock().expect("test compute state lock poisoned");
        inner.regions.insert(region.name.clone(), region);
    }

    /// Configure the instance returned by `get_instance`.
    pub fn set_instance(&self, instance: Instance) {
        let mut inner = self.inner.lock().expect("test compute state lock poisoned");
        inner.instances.insert(instance.name.clone(), instance);
    }

    /// Queue a serial-port read for `instance`. The final queued read keeps
    /// repeating once the queue drains.
    pub fn push_serial_output(&self, instance: &str, contents: &str) {
        let mut inner = self.inner.lock().expect("test compute state lock poisoned");
        let queue = inner.serial.entry(instance.to_string()).or_default();
        let start = queue.back().map(|o| o.next).unwrap_or(0);
        queue.push_back(SerialPortOutput {
            contents: contents.to_string(),
            start,
            next: start + contents.len() as i64,
        });
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.inner.lock().expect("test compute state lock poisoned").calls.clone()
    }

    /// How many times `method` was invoked.
    pub fn method_count(&self, method: &str) -> usize {
        self.inner.lock().expect("test compute state lock poisoned").calls.iter().filter(|c| c.method == method).count()
    }

    /// Targets passed to `method`, in call order.
    pub fn targets(&self, method: &str) -> Vec<String> {
        self.inner
            .lock()
            .expect("test compute state lock poisoned")
            .calls
            .iter()
            .filter(|c| c.method == method)
            .map(|c| c.target.clone())
            .collect()
    }

    /// How many times operation `name` has been polled.
    pub fn operation_polls(&self, name: &str) -> u32 {
        self.inner.lock().expect("test compute state lock poisoned").operation_polls.get(name).copied().unwrap_or(0)
    }

    fn begin(&self, method: &str, target: &str) -> Result<(), ComputeError> {
        let mut inner = self.inner.lock().expect("test compute state lock poisoned");
        inner.calls.push(CallRecord {
            method: method.to_string(),
            target: target.to_string(),
        });
        if let Some(queue) = inner.failures.get_mut(method)
            && let Some(error) = queue.pop_front()
        {
            return Err(error);
        }
        Ok(())
    }

    fn done_operation(&self) -> Operation {
        let mut inner = self.inner.lock().expect("test compute state lock poisoned");
        inner.op_counter += 1;
        Operation {
            name: format!("op-{}", inner.op_counter),
            status: "DONE".into(),
            ..Default::default()
        }
    }

    fn mutate(&self, method: &str, target: &str) -> Result<Operation, ComputeError> {
        self.begin(method, target)?;
        Ok(self.done_operation())
    }

    fn poll_operation(&self, name: &str) -> Operation {
        let mut inner = self.inner.lock().expect("test compute state lock poisoned");
        *inner.operation_polls.entry(name.to_string()).or_insert(0) += 1;
        if let Some(queue) = inner.operations.get_mut(name)
            && let Some(operation) = queue.pop_front()
        {
            return operation;
        }
        Operation {
            name: name.to_string(),
            status: "DONE".into(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ComputeApi for TestComputeService {
    async fn create_disk(&self, _project: &str, _zone: &str, disk: &Disk) -> Result<Operation, ComputeError> {
        self.mutate("disks.insert", &disk.name)
    }

    async fn delete_disk(&self, _project: &str, _zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("disks.delete", name)
    }

    async fn attach_disk(&self, _project: &str, _zone: &str, instance: &str, disk: &AttachedDisk) -> Result<Operation, ComputeError> {
        self.mutate("instances.attachDisk", &format!("{instance}:{}", disk.source))
    }

    async fn detach_disk(&self, _project: &str, _zone: &str, instance: &str, device_name: &str) -> Result<Operation, ComputeError> {
        self.mutate("instances.detachDisk", &format!("{instance}:{device_name}"))
    }

    async fn create_image(&self, _project: &str, image: &Image) -> Result<Operation, ComputeError> {
        self.mutate("images.insert", &image.name)
    }

    async fn delete_image(&self, _project: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("images.delete", name)
    }

    async fn deprecate_image(&self, _project: &str, name: &str, status: &DeprecationStatus) -> Result<Operation, ComputeError> {
        self.mutate("images.deprecate", &format!("{name}:{}", status.state))
    }

    async fn create_machine_image(&self, _project: &str, machine_image: &MachineImage) -> Result<Operation, ComputeError> {
        self.mutate("machineImages.insert", &machine_image.name)
    }

    async fn delete_machine_image(&self, _project: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("machineImages.delete", name)
    }

    async fn create_snapshot(&self, _project: &str, _zone: &str, disk: &str, snapshot: &Snapshot) -> Result<Operation, ComputeError> {
        self.mutate("disks.createSnapshot", &format!("{disk}:{}", snapshot.name))
    }

    async fn delete_snapshot(&self, _project: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("snapshots.delete", name)
    }

    async fn create_instance(&self, _project: &str, _zone: &str, instance: &Instance) -> Result<Operation, ComputeError> {
        self.mutate("instances.insert", &instance.name)
    }

    async fn delete_instance(&self, _project: &str, _zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("instances.delete", name)
    }

    async fn start_instance(&self, _project: &str, _zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("instances.start", name)
    }

    async fn stop_instance(&self, _project: &str, _zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("instances.stop", name)
    }

    async fn suspend_instance(&self, _project: &str, _zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("instances.suspend", name)
    }

    async fn resume_instance(&self, _project: &str, _zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("instances.resume", name)
    }

    async fn set_machine_type(&self, _project: &str, _zone: &str, instance: &str, machine_type: &str) -> Result<Operation, ComputeError> {
        self.mutate("instances.setMachineType", &format!("{instance}:{machine_type}"))
    }

    async fn set_instance_metadata(
        &self,
        _project: &str,
        _zone: &str,
        instance: &str,
        _metadata: &Metadata,
    ) -> Result<Operation, ComputeError> {
        self.mutate("instances.setMetadata", instance)
    }

    async fn get_instance(&self, _project: &str, _zone: &str, name: &str) -> Result<Instance, ComputeError> {
        self.begin("instances.get", name)?;
        let inner = self.inner.lock().expect("test compute state lock poisoned");
        Ok(inner.instances.get(name).cloned().unwrap_or_else(|| Instance {
            name: name.to_string(),
            status: "RUNNING".into(),
            ..Default::default()
        }))
    }

    async fn get_serial_port_output(
        &self,
        _project: &str,
        _zone: &str,
        instance: &str,
        _port: i64,
        start: i64,
    ) -> Result<SerialPortOutput, ComputeError> {
        self.begin("instances.getSerialPortOutput", instance)?;
        let mut inner = self.inner.lock().expect("test compute state lock poisoned");
        let queue = inner.serial.entry(instance.to_string()).or_default();
        let output = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else if let Some(last) = queue.front() {
            last.clone()
        } else {
            SerialPortOutput {
                contents: String::new(),
                start,
                next: start,
            }
        };
        Ok(output)
    }

    async fn create_network(&self, _project: &str, network: &Network) -> Result<Operation, ComputeError> {
        self.mutate("networks.insert", &network.name)
    }

    async fn delete_network(&self, _project: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("networks.delete", name)
    }

    async fn create_subnetwork(&self, _project: &str, _region: &str, subnetwork: &Subnetwork) -> Result<Operation, ComputeError> {
        self.mutate("subnetworks.insert", &subnetwork.name)
    }

    async fn delete_subnetwork(&self, _project: &str, _region: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("subnetworks.delete", name)
    }

    async fn create_target_instance(&self, _project: &str, _zone: &str, target: &TargetInstance) -> Result<Operation, ComputeError> {
        self.mutate("targetInstances.insert", &target.name)
    }

    async fn delete_target_instance(&self, _project: &str, _zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("targetInstances.delete", name)
    }

    async fn create_forwarding_rule(&self, _project: &str, _region: &str, rule: &ForwardingRule) -> Result<Operation, ComputeError> {
        self.mutate("forwardingRules.insert", &rule.name)
    }

    async fn delete_forwarding_rule(&self, _project: &str, _region: &str, name: &str) -> Result<Operation, ComputeError> {
        self.mutate("forwardingRules.delete", name)
    }

    async fn get_region(&self, _project: &str, region: &str) -> Result<Region, ComputeError> {
        self.begin("regions.get", region)?;
        let inner = self.inner.lock().expect("test compute state lock poisoned");
        Ok(inner.regions.get(region).cloned().unwrap_or_else(|| Region {
            name: region.to_string(),
            quotas: Vec::new(),
        }))
    }

    async fn get_zone_operation(&self, _project: &str, _zone: &str, name: &str) -> Result<Operation, ComputeError> {
        Ok(self.poll_operation(name))
    }

    async fn get_region_operation(&self, _project: &str, _region: &str, name: &str) -> Result<Operation, ComputeError> {
        Ok(self.poll_operation(name))
    }

    async fn get_global_operation(&self, _project: &str, name: &str) -> Result<Operation, ComputeError> {
        Ok(self.poll_operation(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_and_scripted_failures() {
        let api = TestComputeService::new();
        api.fail_next("disks.insert", ComputeError::http(500, None, "flake"));

        let disk = Disk {
            name: "d1".into(),
            ..Default::default()
        };
        assert!(api.create_disk("p", "z", &disk).await.is_err());
        assert!(api.create_disk("p", "z", &disk).await.is_ok());
        assert_eq!(api.method_count("disks.insert"), 2);
        assert_eq!(api.targets("disks.insert"), vec!["d1", "d1"]);
    }

    #[tokio::test]
    async fn serial_output_repeats_final_read() {
        let api = TestComputeService::new();
        api.push_serial_output("vm", "booting\n");
        api.push_serial_output("vm", "ready\n");

        let first = api.get_serial_port_output("p", "z", "vm", 1, 0).await.unwrap();
        assert_eq!(first.contents, "booting\n");
        let second = api.get_serial_port_output("p", "z", "vm", 1, first.next).await.unwrap();
        assert_eq!(second.contents, "ready\n");
        let third = api.get_serial_port_output("p", "z", "vm", 1, second.next).await.unwrap();
        assert_eq!(third.contents, "ready\n", "final read repeats");
    }
}
