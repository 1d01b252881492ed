//! Step actions: one module per step kind.
//!
//! Every step variant implements [`StepAction`]: `populate` canonicalizes the
//! payload (defaults, link extension, unique names), `validate` registers the
//! step's intent against the resource registries, and `run` performs the side
//! effect against the compute API. Dispatch is by the payload tag; documents
//! must populate exactly one payload field per step.

use async_trait::async_trait;
use gantry_types::{FlowError, Result};

use crate::workflow::Workflow;

pub mod attach_disks;
pub mod copy_gcs_objects;
pub mod create_disks;
pub mod create_forwarding_rules;
pub mod create_images;
pub mod create_instances;
pub mod create_machine_images;
pub mod create_networks;
pub mod create_snapshots;
pub mod create_subnetworks;
pub mod create_target_instances;
pub mod deprecate_images;
pub mod detach_disks;
pub mod include_workflow;
pub mod instance_ops;
pub mod resource;
pub mod run_tests;
pub mod sub_workflow;
pub mod update_instances_metadata;
pub mod wait_for_available_quotas;
pub mod wait_for_instances_signal;

pub use attach_disks::AttachDisksStep;
pub use copy_gcs_objects::CopyGcsObjectsStep;
pub use create_disks::CreateDisksStep;
pub use create_forwarding_rules::CreateForwardingRulesStep;
pub use create_images::CreateImagesStep;
pub use create_instances::CreateInstancesStep;
pub use create_machine_images::CreateMachineImagesStep;
pub use create_networks::CreateNetworksStep;
pub use create_snapshots::CreateSnapshotsStep;
pub use create_subnetworks::CreateSubnetworksStep;
pub use create_target_instances::CreateTargetInstancesStep;
pub use deprecate_images::DeprecateImagesStep;
pub use detach_disks::DetachDisksStep;
pub use include_workflow::IncludeWorkflowStep;
pub use instance_ops::{ResumeStep, SetMachineTypeStep, StartInstancesStep, StopInstancesStep, SuspendStep};
pub use resource::ResourceSpec;
pub use run_tests::RunTestsStep;
pub use sub_workflow::SubWorkflowStep;
pub use update_instances_metadata::UpdateInstancesMetadataStep;
pub use wait_for_available_quotas::WaitForAvailableQuotasStep;
pub use wait_for_instances_signal::WaitForInstancesSignalStep;

/// Behavior shared by every step payload.
#[async_trait]
pub trait StepAction {
    /// Canonicalize the payload: fill defaults from the workflow, extend
    /// links, assign real names. Runs single-threaded, top-down.
    fn populate(&mut self, workflow: &mut Workflow, step_name: &str) -> Result<()>;

    /// Check the payload and register its intent with the registries.
    fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()>;

    /// Perform the step's side effect.
    async fn run(&self, workflow: &Workflow, step_name: &str) -> Result<()>;
}

/// Tagged step payload; one case per step kind.
#[derive(Debug)]
pub enum StepKind {
    AttachDisks(AttachDisksStep),
    CopyGcsObjects(CopyGcsObjectsStep),
    CreateDisks(CreateDisksStep),
    CreateForwardingRules(CreateForwardingRulesStep),
    CreateImages(CreateImagesStep),
    CreateInstances(CreateInstancesStep),
    CreateMachineImages(CreateMachineImagesStep),
    CreateNetworks(CreateNetworksStep),
    CreateSnapshots(CreateSnapshotsStep),
    CreateSubnetworks(CreateSubnetworksStep),
    CreateTargetInstances(CreateTargetInstancesStep),
    DeprecateImages(DeprecateImagesStep),
    DetachDisks(DetachDisksStep),
    IncludeWorkflow(IncludeWorkflowStep),
    Resume(ResumeStep),
    RunTests(RunTestsStep),
    SetMachineType(SetMachineTypeStep),
    StartInstances(StartInstancesStep),
    StopInstances(StopInstancesStep),
    SubWorkflow(SubWorkflowStep),
    Suspend(SuspendStep),
    UpdateInstancesMetadata(UpdateInstancesMetadataStep),
    WaitForAvailableQuotas(WaitForAvailableQuotasStep),
    WaitForInstancesSignal(WaitForInstancesSignalStep),
}

macro_rules! dispatch {
    ($kind:expr, $action:ident => $body:expr) => {
        match $kind {
            StepKind::AttachDisks($action) => $body,
            StepKind::CopyGcsObjects($action) => $body,
            StepKind::CreateDisks($action) => $body,
            StepKind::CreateForwardingRules($action) => $body,
            StepKind::CreateImages($action) => $body,
            StepKind::CreateInstances($action) => $body,
            StepKind::CreateMachineImages($action) => $body,
            StepKind::CreateNetworks($action) => $body,
            StepKind::CreateSnapshots($action) => $body,
            StepKind::CreateSubnetworks($action) => $body,
            StepKind::CreateTargetInstances($action) => $body,
            StepKind::DeprecateImages($action) => $body,
            StepKind::DetachDisks($action) => $body,
            StepKind::IncludeWorkflow($action) => $body,
            StepKind::Resume($action) => $body,
            StepKind::RunTests($action) => $body,
            StepKind::SetMachineType($action) => $body,
            StepKind::StartInstances($action) => $body,
            StepKind::StopInstances($action) => $body,
            StepKind::SubWorkflow($action) => $body,
            StepKind::Suspend($action) => $body,
            StepKind::UpdateInstancesMetadata($action) => $body,
            StepKind::WaitForAvailableQuotas($action) => $body,
            StepKind::WaitForInstancesSignal($action) => $body,
        }
    };
}

impl StepKind {
    /// Document tag this payload was read from.
    pub fn tag(&self) -> &'static str {
        match self {
            StepKind::AttachDisks(_) => "AttachDisks",
            StepKind::CopyGcsObjects(_) => "CopyGCSObjects",
            StepKind::CreateDisks(_) => "CreateDisks",
            StepKind::CreateForwardingRules(_) => "CreateForwardingRules",
            StepKind::CreateImages(_) => "CreateImages",
            StepKind::CreateInstances(_) => "CreateInstances",
            StepKind::CreateMachineImages(_) => "CreateMachineImages",
            StepKind::CreateNetworks(_) => "CreateNetworks",
            StepKind::CreateSnapshots(_) => "CreateSnapshots",
            StepKind::CreateSubnetworks(_) => "CreateSubnetworks",
            StepKind::CreateTargetInstances(_) => "CreateTargetInstances",
            StepKind::DeprecateImages(_) => "DeprecateImages",
            StepKind::DetachDisks(_) => "DetachDisks",
            StepKind::IncludeWorkflow(_) => "IncludeWorkflow",
            StepKind::Resume(_) => "Resume",
            StepKind::RunTests(_) => "RunTests",
            StepKind::SetMachineType(_) => "SetMachineType",
            StepKind::StartInstances(_) => "StartInstances",
            StepKind::StopInstances(_) => "StopInstances",
            StepKind::SubWorkflow(_) => "SubWorkflow",
            StepKind::Suspend(_) => "Suspend",
            StepKind::UpdateInstancesMetadata(_) => "UpdateInstancesMetadata",
            StepKind::WaitForAvailableQuotas(_) => "WaitForAvailableQuotas",
            StepKind::WaitForInstancesSignal(_) => "WaitForInstancesSignal",
        }
    }

    pub fn populate(&mut self, workflow: &mut Workflow, step_name: &str) -> Result<()> {
        dispatch!(self, action => action.populate(workflow, step_name))
    }

    pub fn validate(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        dispatch!(self, action => action.validate(workflow, step_name))
    }

    pub async fn run(&self, workflow: &Workflow, step_name: &str) -> Result<()> {
        dispatch!(self, action => action.run(workflow, step_name).await)
    }
}

/// Map a compute API failure into the engine's tagged error.
pub(crate) fn api_err(error: gantry_compute::ComputeError) -> FlowError {
    FlowError::api(error.to_string()).with_source(error)
}
