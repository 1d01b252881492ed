//! Shared type definitions for the Gantry workflow engine.
//!
//! This crate is the bottom of the workspace dependency graph. It holds the
//! serde data model for the compute API surface the engine drives, plus the
//! tagged error type every other crate reports through. Nothing in here
//! performs I/O; higher crates (`gantry-compute`, `gantry-engine`) own the
//! behavior.

pub mod compute;
pub mod error;

pub use compute::{
    AccessConfig, AttachedDisk, DeprecationStatus, Disk, ForwardingRule, GuestOsFeature, Image, Instance, MachineImage, Metadata,
    MetadataItem, Network, NetworkInterface, Operation, OperationError, OperationErrorItem, Quota, RawDisk, Region, SerialPortOutput,
    Snapshot, Subnetwork, TargetInstance,
};
pub use error::{ErrorKind, ErrorList, FlowError, Result};
