//! Include/sub-workflow composition and source staging scenarios.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use gantry_compute::TestComputeService;
use gantry_engine::{MemoryStager, StagerAction, StepKind, Workflow};
use gantry_types::ErrorKind;
use serde_json::{Value, json};

fn write_doc(dir: &Path, name: &str, document: Value) {
    fs::write(dir.join(name), document.to_string()).expect("write workflow document");
}

fn child_doc() -> Value {
    json!({
        "Name": "child",
        "Steps": {"mkdisk": {"CreateDisks": [{"Name": "cd"}]}},
    })
}

fn load(dir: &Path, name: &str) -> (Workflow, Arc<TestComputeService>, Arc<MemoryStager>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let api = Arc::new(TestComputeService::new());
    let stager = Arc::new(MemoryStager::new());
    let workflow = Workflow::from_file(dir.join(name), api.clone(), stager.clone()).expect("load workflow");
    (workflow, api, stager)
}

#[tokio::test]
async fn include_shares_registries_with_the_parent() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(dir.path(), "child.json", child_doc());
    write_doc(
        dir.path(),
        "parent.json",
        json!({
            "Name": "parent",
            "Project": "proj",
            "Zone": "us-central1-a",
            "Steps": {
                "inc": {"IncludeWorkflow": {"Path": "child.json"}},
                "img": {"CreateImages": [{"Name": "ci", "SourceDisk": "cd"}]},
            },
            "Dependencies": {"img": ["inc"]},
        }),
    );

    let (mut workflow, api, _stager) = load(dir.path(), "parent.json");
    workflow.populate().expect("populate");
    let id = workflow.id.clone();
    workflow.run().await.expect("parent and included child run clean");

    // The image step consumed the disk created inside the include.
    assert_eq!(api.targets("disks.insert"), vec![format!("cd-{id}")]);
    assert_eq!(api.targets("images.insert"), vec![format!("ci-{id}")]);
    // Shared registries: root cleanup deletes both resources exactly once.
    assert_eq!(api.targets("disks.delete"), vec![format!("cd-{id}")]);
    assert_eq!(api.targets("images.delete"), vec![format!("ci-{id}")]);
}

#[tokio::test]
async fn using_included_resources_still_requires_the_dependency() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(dir.path(), "child.json", child_doc());
    write_doc(
        dir.path(),
        "parent.json",
        json!({
            "Name": "parent",
            "Project": "proj",
            "Zone": "us-central1-a",
            "Steps": {
                "inc": {"IncludeWorkflow": {"Path": "child.json"}},
                "img": {"CreateImages": [{"Name": "ci", "SourceDisk": "cd"}]},
            },
        }),
    );

    let (mut workflow, _api, _stager) = load(dir.path(), "parent.json");
    workflow.populate().expect("populate");
    let error = workflow.validate().expect_err("img does not depend on the include");
    assert_eq!(error.kind(), ErrorKind::MissingDependency);
}

#[tokio::test]
async fn sub_workflow_cleans_up_its_own_resources() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(dir.path(), "child.json", child_doc());
    write_doc(
        dir.path(),
        "parent.json",
        json!({
            "Name": "parent",
            "Project": "proj",
            "Zone": "us-central1-a",
            "Steps": {"sub": {"SubWorkflow": {"Path": "child.json"}}},
        }),
    );

    let (mut workflow, api, _stager) = load(dir.path(), "parent.json");
    workflow.populate().expect("populate");
    let id = workflow.id.clone();
    workflow.run().await.expect("sub-workflow runs clean");

    assert_eq!(api.targets("disks.insert"), vec![format!("cd-{id}")]);
    assert_eq!(api.method_count("disks.delete"), 1, "the sub-workflow deletes its disk at its own end");
}

#[tokio::test]
async fn run_tests_executes_an_isolated_workflow() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(dir.path(), "suite.json", child_doc());
    write_doc(
        dir.path(),
        "parent.json",
        json!({
            "Name": "parent",
            "Project": "proj",
            "Zone": "us-central1-a",
            "Steps": {"verify": {"RunTests": {"Path": "suite.json"}}},
        }),
    );

    let (workflow, api, _stager) = load(dir.path(), "parent.json");
    workflow.run().await.expect("test workflow runs clean");
    assert_eq!(api.method_count("disks.insert"), 1);
    assert_eq!(api.method_count("disks.delete"), 1);
}

#[test]
fn include_vars_seed_the_child() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_doc(
        dir.path(),
        "child.json",
        json!({
            "Name": "child",
            "Vars": {"disk_name": {"Required": true, "Description": "name of the produced disk"}},
            "Steps": {"mkdisk": {"CreateDisks": [{"Name": "${disk_name}"}]}},
        }),
    );
    write_doc(
        dir.path(),
        "parent.json",
        json!({
            "Name": "parent",
            "Project": "proj",
            "Zone": "us-central1-a",
            "Steps": {"inc": {"IncludeWorkflow": {"Path": "child.json", "Vars": {"disk_name": "seeded"}}}},
        }),
    );

    let (mut workflow, _api, _stager) = load(dir.path(), "parent.json");
    workflow.populate().expect("populate");

    let StepKind::IncludeWorkflow(include) = &workflow.steps["inc"].kind else {
        panic!("expected an IncludeWorkflow step");
    };
    let child = include.workflow.as_ref().expect("child is populated");
    let StepKind::CreateDisks(disks) = &child.steps["mkdisk"].kind else {
        panic!("expected a CreateDisks step in the child");
    };
    assert_eq!(disks.0[0].resource.name, "seeded");
}

#[tokio::test]
async fn sources_stage_under_the_run_prefix() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("startup.sh"), "#!/bin/sh\necho ok\n").expect("write source");
    write_doc(
        dir.path(),
        "wf.json",
        json!({
            "Name": "wf",
            "Project": "proj",
            "Zone": "us-central1-a",
            "GCSPath": "gs://wf-bucket/stage",
            "Sources": {"startup.sh": "startup.sh"},
            "Steps": {},
        }),
    );

    let (mut workflow, _api, stager) = load(dir.path(), "wf.json");
    workflow.populate().expect("populate");
    let id = workflow.id.clone();
    workflow.run().await.expect("staging succeeds");

    let destination = format!("gs://wf-bucket/stage/{id}/sources/startup.sh");
    let actions = stager.actions();
    assert!(
        actions
            .iter()
            .any(|action| matches!(action, StagerAction::Upload { destination: d, .. } if *d == destination)),
        "expected an upload to {destination}, got {actions:?}"
    );
}
