//! # Gantry Engine
//!
//! A declarative workflow engine that executes a DAG of steps against a
//! cloud compute API. A workflow document describes parameterized resources
//! (disks, images, instances, networks, subnetworks, snapshots, machine
//! images, target instances, forwarding rules) and typed steps that create,
//! mutate and observe them. The engine:
//!
//! - parses the document and resolves `${var}` interpolation (single-pass)
//! - expands short resource names into fully-qualified links
//! - validates the graph and each step's intent against per-kind resource
//!   registries that enforce lifecycle invariants
//! - executes steps concurrently, honoring dependencies, per-step timeouts,
//!   failure propagation and broadcast cancellation
//! - cleans up every resource it created when the workflow ends
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gantry_compute::TestComputeService;
//! use gantry_engine::{MemoryStager, Workflow};
//!
//! # #[tokio::main] async fn main() -> Result<(), gantry_types::FlowError> {
//! let api = Arc::new(TestComputeService::new());
//! let stager = Arc::new(MemoryStager::new());
//! let mut workflow = Workflow::from_file("build.wf.json", api, stager)?;
//! workflow.set_project("my-project");
//! workflow.set_zone("us-central1-a");
//! workflow.run().await?;
//! # Ok(()) }
//! ```
//!
//! ## Architecture
//!
//! - [`model`]: serde shapes of the workflow document
//! - [`vars`]: `${NAME}` substitution over the document tree
//! - [`workflow`]: the aggregate driving populate → validate → run → cleanup
//! - [`registry`]: per-kind resource lifecycle bookkeeping
//! - [`depgraph`]: transitive dependency oracle over qualified step ids
//! - [`scheduler`]: concurrent DAG executor
//! - [`steps`]: one action module per step kind
//! - [`sources`]: staging contract for workflow source files

pub mod cancel;
pub mod depgraph;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod sources;
pub mod steps;
pub mod vars;
pub mod workflow;

pub use cancel::CancelSignal;
pub use model::Var;
pub use registry::{Registries, Resource, ResourceKind};
pub use sources::{MemoryStager, SourceStager, StagerAction};
pub use steps::{StepAction, StepKind};
pub use workflow::{DEFAULT_TIMEOUT, Step, Workflow};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use gantry_compute::TestComputeService;

    use crate::sources::MemoryStager;
    use crate::workflow::Workflow;

    /// Minimal populated workflow for step-level unit tests.
    pub(crate) fn bare_workflow() -> Workflow {
        let api = Arc::new(TestComputeService::new());
        let stager = Arc::new(MemoryStager::new());
        let mut workflow = Workflow::from_json(r#"{"Name": "wf", "Project": "proj", "Zone": "us-central1-a"}"#, api, stager)
            .expect("parse workflow");
        workflow.populate().expect("populate workflow");
        workflow
    }
}
