//! Workflow document model.
//!
//! These are the serde shapes of the JSON workflow document: top-level
//! workflow fields, `Vars` entries (bare string or detailed object), and the
//! step envelope with its one-of payload fields. Conversion into runtime
//! types happens during populate, after variable substitution has been
//! applied to the document tree.

use gantry_types::{FlowError, Result};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::steps::{
    AttachDisksStep, CopyGcsObjectsStep, CreateDisksStep, CreateForwardingRulesStep, CreateImagesStep, CreateInstancesStep,
    CreateMachineImagesStep, CreateNetworksStep, CreateSnapshotsStep, CreateSubnetworksStep, CreateTargetInstancesStep,
    DeprecateImagesStep, DetachDisksStep, IncludeWorkflowStep, ResumeStep, RunTestsStep, SetMachineTypeStep, StartInstancesStep,
    StepKind, StopInstancesStep, SubWorkflowStep, SuspendStep, UpdateInstancesMetadataStep, WaitForAvailableQuotasStep,
    WaitForInstancesSignalStep,
};

/// Top-level document fields. `Vars` is handled separately, before
/// substitution, and is therefore absent here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WorkflowDoc {
    pub name: String,
    pub project: String,
    pub zone: String,
    #[serde(rename = "GCSPath")]
    pub gcs_path: String,
    #[serde(rename = "OAuthPath")]
    pub oauth_path: String,
    pub default_timeout: String,
    pub sources: IndexMap<String, String>,
    pub steps: IndexMap<String, StepSpec>,
    pub dependencies: IndexMap<String, Vec<String>>,
}

/// A `Vars` entry: either a bare string or `{Value, Required, Description}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VarSpec {
    Plain(String),
    Detailed {
        #[serde(default, rename = "Value")]
        value: String,
        #[serde(default, rename = "Required")]
        required: bool,
        #[serde(default, rename = "Description")]
        description: String,
    },
}

/// Runtime form of a workflow variable.
#[derive(Debug, Clone, Default)]
pub struct Var {
    pub value: String,
    pub required: bool,
    pub description: String,
}

impl VarSpec {
    pub fn into_var(self) -> Var {
        match self {
            VarSpec::Plain(value) => Var {
                value,
                ..Default::default()
            },
            VarSpec::Detailed {
                value,
                required,
                description,
            } => Var {
                value,
                required,
                description,
            },
        }
    }
}

/// Step envelope: an optional timeout plus exactly one payload field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StepSpec {
    pub timeout: String,
    pub attach_disks: Option<AttachDisksStep>,
    #[serde(rename = "CopyGCSObjects")]
    pub copy_gcs_objects: Option<CopyGcsObjectsStep>,
    pub create_disks: Option<CreateDisksStep>,
    pub create_forwarding_rules: Option<CreateForwardingRulesStep>,
    pub create_images: Option<CreateImagesStep>,
    pub create_instances: Option<CreateInstancesStep>,
    pub create_machine_images: Option<CreateMachineImagesStep>,
    pub create_networks: Option<CreateNetworksStep>,
    pub create_snapshots: Option<CreateSnapshotsStep>,
    pub create_subnetworks: Option<CreateSubnetworksStep>,
    pub create_target_instances: Option<CreateTargetInstancesStep>,
    pub deprecate_images: Option<DeprecateImagesStep>,
    pub detach_disks: Option<DetachDisksStep>,
    pub include_workflow: Option<IncludeWorkflowStep>,
    pub resume: Option<ResumeStep>,
    pub run_tests: Option<RunTestsStep>,
    pub set_machine_type: Option<SetMachineTypeStep>,
    pub start_instances: Option<StartInstancesStep>,
    pub stop_instances: Option<StopInstancesStep>,
    pub sub_workflow: Option<SubWorkflowStep>,
    pub suspend: Option<SuspendStep>,
    pub update_instances_metadata: Option<UpdateInstancesMetadataStep>,
    pub wait_for_available_quotas: Option<WaitForAvailableQuotasStep>,
    pub wait_for_instances_signal: Option<WaitForInstancesSignalStep>,
}

impl StepSpec {
    /// Extract the single populated payload. Zero or multiple payloads are
    /// a document error.
    pub fn into_kind(self) -> Result<StepKind> {
        let mut kinds: Vec<StepKind> = Vec::new();

        macro_rules! collect {
            ($($field:ident => $variant:ident),+ $(,)?) => {
                $(if let Some(payload) = self.$field {
                    kinds.push(StepKind::$variant(payload));
                })+
            };
        }
        collect!(
            attach_disks => AttachDisks,
            copy_gcs_objects => CopyGcsObjects,
            create_disks => CreateDisks,
            create_forwarding_rules => CreateForwardingRules,
            create_images => CreateImages,
            create_instances => CreateInstances,
            create_machine_images => CreateMachineImages,
            create_networks => CreateNetworks,
            create_snapshots => CreateSnapshots,
            create_subnetworks => CreateSubnetworks,
            create_target_instances => CreateTargetInstances,
            deprecate_images => DeprecateImages,
            detach_disks => DetachDisks,
            include_workflow => IncludeWorkflow,
            resume => Resume,
            run_tests => RunTests,
            set_machine_type => SetMachineType,
            start_instances => StartInstances,
            stop_instances => StopInstances,
            sub_workflow => SubWorkflow,
            suspend => Suspend,
            update_instances_metadata => UpdateInstancesMetadata,
            wait_for_available_quotas => WaitForAvailableQuotas,
            wait_for_instances_signal => WaitForInstancesSignal,
        );

        match kinds.len() {
            1 => Ok(kinds.pop().unwrap()),
            0 => Err(FlowError::invalid_input("step defines no action")),
            _ => Err(FlowError::invalid_input(format!(
                "step defines multiple actions: {}",
                kinds.iter().map(StepKind::tag).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_spec_accepts_both_forms() {
        let plain: VarSpec = serde_json::from_str(r#""some-value""#).expect("plain var");
        assert!(matches!(plain, VarSpec::Plain(v) if v == "some-value"));

        let detailed: VarSpec = serde_json::from_str(r#"{"Value": "v", "Required": true, "Description": "d"}"#).expect("detailed var");
        match detailed {
            VarSpec::Detailed { value, required, .. } => {
                assert_eq!(value, "v");
                assert!(required);
            }
            VarSpec::Plain(_) => panic!("expected detailed form"),
        }
    }

    #[test]
    fn step_with_one_payload_converts() {
        let spec: StepSpec = serde_json::from_str(r#"{"Timeout": "1m", "StartInstances": ["vm-1"]}"#).expect("parse step");
        let kind = spec.into_kind().expect("single payload");
        assert_eq!(kind.tag(), "StartInstances");
    }

    #[test]
    fn step_with_no_payload_is_rejected() {
        let spec: StepSpec = serde_json::from_str(r#"{"Timeout": "1m"}"#).expect("parse step");
        assert!(spec.into_kind().is_err());
    }

    #[test]
    fn step_with_two_payloads_is_rejected() {
        let spec: StepSpec =
            serde_json::from_str(r#"{"StartInstances": ["vm-1"], "StopInstances": ["vm-2"]}"#).expect("parse step");
        let error = spec.into_kind().unwrap_err();
        assert!(error.to_string().contains("StartInstances"));
        assert!(error.to_string().contains("StopInstances"));
    }
}
