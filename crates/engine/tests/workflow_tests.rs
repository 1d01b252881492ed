//! End-to-end workflow scenarios against the in-memory compute double.

use std::sync::Arc;
use std::time::Duration;

use gantry_compute::{ComputeError, TestComputeService};
use gantry_engine::{MemoryStager, StepKind, Workflow};
use gantry_types::{ErrorKind, Quota, Region};
use serde_json::{Value, json};

fn harness(document: Value) -> (Workflow, Arc<TestComputeService>, Arc<MemoryStager>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let api = Arc::new(TestComputeService::new());
    let stager = Arc::new(MemoryStager::new());
    let workflow = Workflow::from_json(&document.to_string(), api.clone(), stager.clone()).expect("parse workflow");
    (workflow, api, stager)
}

fn base_doc(steps: Value) -> Value {
    json!({
        "Name": "wf",
        "Project": "proj",
        "Zone": "us-central1-a",
        "Steps": steps,
    })
}

#[test]
fn ipv6_only_subnetwork_with_ipv4_cidr_fails_validation() {
    let (mut workflow, _api, _stager) = harness(base_doc(json!({
        "make-subnetwork": {
            "CreateSubnetworks": [{
                "Name": "sn",
                "Network": "default",
                "Region": "us-central1",
                "StackType": "IPV6_ONLY",
                "IpCidrRange": "10.0.0.0/24",
                "Ipv6AccessType": "INTERNAL",
            }]
        }
    })));
    workflow.populate().expect("populate");
    let error = workflow.validate().expect_err("IPv6-only with IPv4 CIDR must fail");
    assert_eq!(error.kind(), ErrorKind::InvalidInput);
    assert!(
        error.to_string().contains("IPv6-only subnetworks must not have an IPv4 CIDR range"),
        "unexpected message: {error}"
    );
}

#[tokio::test]
async fn wait_for_quotas_succeeds_on_first_tick() {
    let (workflow, api, _stager) = harness(base_doc(json!({
        "wait": {
            "WaitForAvailableQuotas": {
                "Interval": "0.1s",
                "Quotas": [
                    {"Metric": "A", "Region": "us-central1", "Units": 4.5},
                    {"Metric": "C", "Region": "us-central1", "Units": 6.0},
                ]
            }
        }
    })));
    api.set_region(Region {
        name: "us-central1".into(),
        quotas: vec![
            Quota {
                metric: "A".into(),
                limit: 10.0,
                usage: 5.0,
            },
            Quota {
                metric: "C".into(),
                limit: 10.0,
                usage: 4.0,
            },
        ],
    });

    workflow.run().await.expect("quotas are available on the first poll");
    assert_eq!(api.method_count("regions.get"), 1, "one region poll should suffice");
}

#[tokio::test]
async fn wait_for_quotas_times_out_when_unavailable() {
    let (workflow, api, _stager) = harness(base_doc(json!({
        "wait": {
            "Timeout": "0.5s",
            "WaitForAvailableQuotas": {
                "Interval": "0.1s",
                "Quotas": [{"Metric": "B", "Region": "us-central1", "Units": 1.0}]
            }
        }
    })));
    api.set_region(Region {
        name: "us-central1".into(),
        quotas: vec![Quota {
            metric: "B".into(),
            limit: 10.0,
            usage: 10.0,
        }],
    });

    let error = workflow.run().await.expect_err("quota never frees up");
    assert_eq!(error.kind(), ErrorKind::Timeout);
}

#[test]
fn resume_populate_fills_defaults_without_overwriting() {
    let (mut workflow, _api, _stager) = harness(json!({
        "Name": "wf",
        "Project": "foo",
        "Zone": "bar",
        "Steps": {"wake": {"Resume": {"Instance": "baz"}}},
    }));
    workflow.populate().expect("populate");
    let StepKind::Resume(resume) = &workflow.steps["wake"].kind else {
        panic!("expected a Resume step");
    };
    assert_eq!(resume.0.project, "foo");
    assert_eq!(resume.0.zone, "bar");
    assert_eq!(resume.0.instance, "baz");

    let (mut preset, _api, _stager) = harness(json!({
        "Name": "wf",
        "Project": "foo",
        "Zone": "bar",
        "Steps": {"wake": {"Resume": {"Instance": "baz", "Project": "x", "Zone": "y"}}},
    }));
    preset.populate().expect("populate");
    let StepKind::Resume(resume) = &preset.steps["wake"].kind else {
        panic!("expected a Resume step");
    };
    assert_eq!(resume.0.project, "x", "explicit Project must be preserved");
    assert_eq!(resume.0.zone, "y", "explicit Zone must be preserved");
}

#[tokio::test]
async fn failed_step_skips_descendants_and_cleans_up() {
    let (mut workflow, api, _stager) = harness(json!({
        "Name": "wf",
        "Project": "proj",
        "Zone": "us-central1-a",
        "Steps": {
            "pre": {"CreateNetworks": [{"Name": "net"}]},
            "boom": {"CreateDisks": [{"Name": "d"}]},
            "b": {"CreateDisks": [{"Name": "db"}]},
            "c": {"CreateDisks": [{"Name": "dc"}]},
        },
        "Dependencies": {
            "boom": ["pre"],
            "b": ["boom"],
            "c": ["boom"],
        },
    }));
    api.fail_next("disks.insert", ComputeError::http(400, None, "bad disk"));

    workflow.populate().expect("populate");
    let id = workflow.id.clone();
    let error = workflow.run().await.expect_err("boom fails the workflow");
    assert_eq!(error.kind(), ErrorKind::Api);
    assert!(error.to_string().contains("boom"), "error should name the failed step: {error}");

    // Only boom's disk insert was attempted; b and c never ran.
    assert_eq!(api.targets("disks.insert"), vec![format!("d-{id}")]);
    // The network created before the failure is cleaned up.
    assert_eq!(api.targets("networks.delete"), vec![format!("net-{id}")]);
}

#[test]
fn reattach_without_dependency_on_disconnector_fails() {
    let (mut workflow, _api, _stager) = harness(json!({
        "Name": "wf",
        "Project": "proj",
        "Zone": "us-central1-a",
        "Steps": {
            "mkdisks": {"CreateDisks": [{"Name": "boot"}, {"Name": "data"}]},
            "vm": {"CreateInstances": [{"Name": "vm", "Disks": [{"Source": "boot"}]}]},
            "attach1": {"AttachDisks": [{"Source": "data", "Instance": "vm"}]},
            "detach1": {"DetachDisks": [{"Source": "data", "Instance": "vm"}]},
            "attach2": {"AttachDisks": [{"Source": "data", "Instance": "vm"}]},
        },
        "Dependencies": {
            "vm": ["mkdisks"],
            "attach1": ["vm"],
            "detach1": ["attach1"],
            "attach2": ["vm"],
        },
    }));
    workflow.populate().expect("populate");
    let error = workflow.validate().expect_err("reattach must be ordered after the detach");
    assert_eq!(error.kind(), ErrorKind::MissingDependency);
    assert!(error.to_string().contains("detach1"), "error should reference the disconnector: {error}");
}

#[tokio::test]
async fn ordered_attach_detach_runs_clean() {
    let (workflow, api, _stager) = harness(json!({
        "Name": "wf",
        "Project": "proj",
        "Zone": "us-central1-a",
        "Steps": {
            "mkdisks": {"CreateDisks": [{"Name": "boot"}, {"Name": "data"}]},
            "vm": {"CreateInstances": [{"Name": "vm", "Disks": [{"Source": "boot"}]}]},
            "attach1": {"AttachDisks": [{"Source": "data", "Instance": "vm"}]},
            "detach1": {"DetachDisks": [{"Source": "data", "Instance": "vm"}]},
        },
        "Dependencies": {
            "vm": ["mkdisks"],
            "attach1": ["vm"],
            "detach1": ["attach1"],
        },
    }));
    workflow.run().await.expect("workflow runs clean");
    assert_eq!(api.method_count("instances.attachDisk"), 1);
    assert_eq!(api.method_count("instances.detachDisk"), 1);
}

#[test]
fn duplicate_creation_without_overwrite_is_multiple_creators() {
    let (mut workflow, _api, _stager) = harness(base_doc(json!({
        "one": {"CreateDisks": [{"Name": "d"}]},
        "two": {"CreateDisks": [{"Name": "d"}]},
    })));
    workflow.populate().expect("populate");
    let error = workflow.validate().expect_err("duplicate creation");
    assert_eq!(error.kind(), ErrorKind::MultipleCreators);
}

#[test]
fn use_without_dependency_on_creator_fails() {
    let (mut workflow, _api, _stager) = harness(base_doc(json!({
        "mkdisk": {"CreateDisks": [{"Name": "d"}]},
        "img": {"CreateImages": [{"Name": "i", "SourceDisk": "d"}]},
    })));
    workflow.populate().expect("populate");
    let error = workflow.validate().expect_err("image step does not depend on the disk creator");
    assert_eq!(error.kind(), ErrorKind::MissingDependency);
}

#[test]
fn variable_substitution_is_single_pass() {
    let (mut workflow, _api, _stager) = harness(json!({
        "Name": "wf",
        "Project": "proj",
        "Zone": "us-central1-a",
        "Vars": {"indirect": "${ID}"},
        "Steps": {"pause": {"Suspend": {"Instance": "${indirect}"}}},
    }));
    workflow.populate().expect("populate");
    let StepKind::Suspend(suspend) = &workflow.steps["pause"].kind else {
        panic!("expected a Suspend step");
    };
    // ${indirect} expands to the literal "${ID}"; the replacement is never
    // re-scanned.
    assert_eq!(suspend.0.instance, "${ID}");
}

#[test]
fn required_var_must_be_bound() {
    let document = json!({
        "Name": "wf",
        "Project": "proj",
        "Zone": "us-central1-a",
        "Vars": {"must": {"Required": true, "Description": "a mandatory input"}},
        "Steps": {},
    });
    let (mut workflow, _api, _stager) = harness(document.clone());
    let error = workflow.populate().expect_err("required var is unset");
    assert_eq!(error.kind(), ErrorKind::InvalidInput);
    assert!(error.to_string().contains("must"));

    let (mut workflow, _api, _stager) = harness(document);
    workflow.set_var("must", "bound");
    workflow.populate().expect("bound var satisfies the requirement");
}

#[tokio::test]
async fn explicit_validate_then_run_does_not_reregister_creations() {
    let (mut workflow, api, _stager) = harness(base_doc(json!({
        "mkdisk": {"CreateDisks": [{"Name": "d"}]},
    })));
    workflow.populate().expect("populate");
    workflow.validate().expect("validate");
    // run() validates again internally; a successful validation must not be
    // replayed into spurious MultipleCreators failures.
    workflow.run().await.expect("run after an explicit validate");
    assert_eq!(api.method_count("disks.insert"), 1);
    assert_eq!(api.method_count("disks.delete"), 1);
}

#[tokio::test]
async fn cleanup_deletes_each_created_resource_exactly_once() {
    let (mut workflow, api, _stager) = harness(base_doc(json!({
        "mkdisks": {"CreateDisks": [{"Name": "keep", "NoCleanup": true}, {"Name": "temp"}]},
    })));
    workflow.populate().expect("populate");
    let id = workflow.id.clone();
    workflow.run().await.expect("workflow runs clean");
    assert_eq!(api.targets("disks.delete"), vec![format!("temp-{id}")], "only the unexempted disk is deleted");
}

#[tokio::test]
async fn workflow_cancel_ends_quota_wait_quietly() {
    let (mut workflow, _api, _stager) = harness(base_doc(json!({
        "wait": {
            "WaitForAvailableQuotas": {
                "Interval": "0.1s",
                "Quotas": [{"Metric": "NEVER", "Region": "us-central1", "Units": 1.0}]
            }
        }
    })));
    workflow.populate().expect("populate");
    let cancel = workflow.cancel.clone();

    let run = tokio::spawn(workflow.run());
    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run must return promptly after cancel")
        .expect("task");
    result.expect("cancelled quota wait is an orderly shutdown, not an error");
}

#[tokio::test]
async fn wait_for_signal_matches_serial_output() {
    let (mut workflow, api, _stager) = harness(json!({
        "Name": "wf",
        "Project": "proj",
        "Zone": "us-central1-a",
        "Steps": {
            "vm": {"CreateInstances": [{"Name": "vm", "Disks": [{"Source": "projects/proj/zones/us-central1-a/disks/boot"}]}]},
            "watch": {
                "Timeout": "5s",
                "WaitForInstancesSignal": [{
                    "Name": "vm",
                    "Interval": "0.1s",
                    "SerialOutput": {"Port": 1, "SuccessMatch": "BuildSuccess", "FailureMatch": "BuildFailed"}
                }]
            },
        },
        "Dependencies": {"watch": ["vm"]},
    }));
    workflow.populate().expect("populate");
    let id = workflow.id.clone();
    // The watcher reads the uniqued instance name.
    api.push_serial_output(&format!("vm-{id}"), "booting...\n");
    api.push_serial_output(&format!("vm-{id}"), "build finished: BuildSuccess\n");
    workflow.run().await.expect("success match ends the wait");
    assert!(api.method_count("instances.getSerialPortOutput") >= 1);
}

#[tokio::test]
async fn wait_for_signal_failure_match_fails_step() {
    let (mut workflow, api, _stager) = harness(json!({
        "Name": "wf",
        "Project": "proj",
        "Zone": "us-central1-a",
        "Steps": {
            "vm": {"CreateInstances": [{"Name": "vm", "Disks": [{"Source": "projects/proj/zones/us-central1-a/disks/boot"}]}]},
            "watch": {
                "Timeout": "5s",
                "WaitForInstancesSignal": [{
                    "Name": "vm",
                    "Interval": "0.1s",
                    "SerialOutput": {"Port": 1, "SuccessMatch": "BuildSuccess", "FailureMatch": "BuildFailed"}
                }]
            },
        },
        "Dependencies": {"watch": ["vm"]},
    }));
    workflow.populate().expect("populate");
    let id = workflow.id.clone();
    api.push_serial_output(&format!("vm-{id}"), "BuildFailed: no bootable kernel\n");
    let error = workflow.run().await.expect_err("failure match fails the step");
    assert!(error.to_string().contains("BuildFailed"), "unexpected error: {error}");
}
