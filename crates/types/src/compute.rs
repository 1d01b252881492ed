//! Serde data model for the compute API surface the engine drives.
//!
//! These mirror the JSON wire shapes of the cloud compute v1 API for the
//! resource kinds the engine creates and mutates. Fields default so partial
//! documents deserialize cleanly; the engine fills in what populate derives
//! (links, zones, real names) before anything is sent over the wire.

use serde::{Deserialize, Serialize};

/// An asynchronous compute API operation, long-polled until terminal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Operation {
    pub name: String,
    /// One of `PENDING`, `RUNNING`, `DONE`.
    pub status: String,
    pub operation_type: String,
    pub target_link: String,
    pub self_link: String,
    pub zone: Option<String>,
    pub region: Option<String>,
    pub error: Option<OperationError>,
}

/// Error envelope attached to a failed operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationError {
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationErrorItem {
    pub code: String,
    pub message: String,
    pub location: Option<String>,
}

/// A single metered quota as reported per region.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Quota {
    pub metric: String,
    pub limit: f64,
    pub usage: f64,
}

/// Region description; the engine only consumes the quota table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Region {
    pub name: String,
    pub quotas: Vec<Quota>,
}

/// A persistent disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Disk {
    pub name: String,
    pub zone: String,
    pub source_image: String,
    pub source_snapshot: String,
    pub size_gb: Option<i64>,
    #[serde(rename = "type")]
    pub disk_type: String,
    pub licenses: Vec<String>,
    pub guest_os_features: Vec<GuestOsFeature>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuestOsFeature {
    #[serde(rename = "type")]
    pub feature_type: String,
}

/// A machine image built from a disk or another image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Image {
    pub name: String,
    pub family: String,
    pub source_disk: String,
    pub source_image: String,
    pub raw_disk: Option<RawDisk>,
    pub licenses: Vec<String>,
    pub guest_os_features: Vec<GuestOsFeature>,
    pub deprecated: Option<DeprecationStatus>,
}

/// Pointer to an uploaded raw disk tarball backing an image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawDisk {
    pub source: String,
}

/// Deprecation state transition for an image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeprecationStatus {
    /// One of `ACTIVE`, `DEPRECATED`, `OBSOLETE`, `DELETED`.
    pub state: String,
    pub replacement: String,
}

/// Full-machine image capturing an instance's disks and configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MachineImage {
    pub name: String,
    pub source_instance: String,
    pub storage_locations: Vec<String>,
}

/// A virtual machine instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub status: String,
    pub disks: Vec<AttachedDisk>,
    pub network_interfaces: Vec<NetworkInterface>,
    pub metadata: Option<Metadata>,
    pub labels: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Disk attachment record inside an instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachedDisk {
    pub source: String,
    pub boot: bool,
    pub auto_delete: bool,
    pub device_name: String,
    pub mode: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInterface {
    pub network: String,
    pub subnetwork: String,
    #[serde(rename = "networkIP")]
    pub network_ip: String,
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessConfig {
    #[serde(rename = "type")]
    pub config_type: String,
    pub name: String,
}

/// Key/value metadata attached to an instance, guarded by a fingerprint for
/// read-modify-write updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    pub fingerprint: String,
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataItem {
    pub key: String,
    pub value: Option<String>,
}

impl Metadata {
    /// Insert or replace an item by key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = Some(value.into());
        if let Some(existing) = self.items.iter_mut().find(|item| item.key == key) {
            existing.value = value;
            return;
        }
        self.items.push(MetadataItem { key, value });
    }
}

/// A VPC network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Network {
    pub name: String,
    pub auto_create_subnetworks: Option<bool>,
    pub mtu: Option<i64>,
}

/// A regional subnetwork of a VPC network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subnetwork {
    pub name: String,
    pub network: String,
    pub region: String,
    pub ip_cidr_range: String,
    /// One of `IPV4_ONLY`, `IPV4_IPV6`, `IPV6_ONLY`.
    pub stack_type: String,
    /// One of `INTERNAL`, `EXTERNAL`; required when the IPv6 part is active.
    pub ipv6_access_type: String,
    pub internal_ipv6_prefix: String,
    pub external_ipv6_prefix: String,
}

/// A point-in-time disk snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub name: String,
    pub source_disk: String,
}

/// Target instance receiving protocol-forwarded traffic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetInstance {
    pub name: String,
    pub zone: String,
    pub instance: String,
    pub nat_policy: String,
}

/// Regional forwarding rule pointing at a target instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForwardingRule {
    pub name: String,
    pub region: String,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    pub port_range: String,
    pub target: String,
}

/// One read of an instance's serial console.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerialPortOutput {
    pub contents: String,
    pub start: i64,
    pub next: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_round_trips_wire_names() {
        let raw = r#"{
            "name": "operation-123",
            "status": "DONE",
            "operationType": "insert",
            "error": {"errors": [{"code": "QUOTA_EXCEEDED", "message": "out of CPUS"}]}
        }"#;
        let op: Operation = serde_json::from_str(raw).expect("parse operation");
        assert_eq!(op.status, "DONE");
        assert_eq!(op.operation_type, "insert");
        let error = op.error.expect("error present");
        assert_eq!(error.errors[0].code, "QUOTA_EXCEEDED");
    }

    #[test]
    fn disk_type_uses_wire_field_name() {
        let raw = r#"{"name": "d1", "type": "pd-ssd", "sizeGb": 20}"#;
        let disk: Disk = serde_json::from_str(raw).expect("parse disk");
        assert_eq!(disk.disk_type, "pd-ssd");
        assert_eq!(disk.size_gb, Some(20));
    }

    #[test]
    fn metadata_set_replaces_existing_key() {
        let mut metadata = Metadata::default();
        metadata.set("status", "pending");
        metadata.set("status", "done");
        assert_eq!(metadata.items.len(), 1);
        assert_eq!(metadata.items[0].value.as_deref(), Some("done"));
    }

    #[test]
    fn forwarding_rule_ip_fields_match_api_casing() {
        let rule = ForwardingRule {
            name: "fr".into(),
            ip_address: "10.0.0.1".into(),
            ip_protocol: "TCP".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&rule).expect("serialize rule");
        assert!(value.get("IPAddress").is_some());
        assert!(value.get("IPProtocol").is_some());
    }
}
