//! Shared resource envelope for `Create*` step payloads.

use gantry_compute::{OperationScope, wait_for_operation};
use gantry_types::{FlowError, Operation, Result};
use gantry_util::links::LinkScope;
use gantry_util::names::{is_rfc1035_label, is_valid_project_id, suffixed_name};
use serde::{Deserialize, Serialize};

use crate::registry::{Resource, ResourceKind};
use crate::steps::api_err;
use crate::workflow::Workflow;

/// Fields common to every created resource, flattened into each payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResourceSpec {
    /// Logical name as written in the document.
    pub name: String,
    pub project: String,
    pub zone: String,
    pub region: String,
    /// Leave the resource behind when the workflow ends.
    pub no_cleanup: bool,
    /// Use `name` verbatim instead of appending the run-id suffix.
    pub exact_name: bool,
    /// Delete a colliding pre-existing resource before creating.
    pub over_write: bool,
    /// Uniqued name sent to the cloud; assigned during populate.
    #[serde(skip)]
    pub real_name: String,
    /// Fully-qualified link; assigned during populate.
    #[serde(skip)]
    pub link: String,
}

impl ResourceSpec {
    /// Fill project/locus defaults from the workflow, assign the real name
    /// and the fully-qualified link.
    pub fn populate(&mut self, workflow: &Workflow, kind: ResourceKind) {
        if self.project.is_empty() {
            self.project = workflow.project.clone();
        }
        match kind.template().scope() {
            LinkScope::Zonal => {
                if self.zone.is_empty() {
                    self.zone = workflow.zone.clone();
                }
            }
            LinkScope::Regional => {
                if self.region.is_empty() {
                    self.region = workflow.region.clone();
                }
            }
            LinkScope::Global => {}
        }
        self.real_name = if self.exact_name {
            self.name.clone()
        } else {
            suffixed_name(&self.name, &workflow.id)
        };
        self.link = kind.template().link(&self.project, self.locus(kind), &self.real_name);
    }

    /// Zone or region this resource lives in; empty for global kinds.
    pub fn locus(&self, kind: ResourceKind) -> &str {
        match kind.template().scope() {
            LinkScope::Zonal => &self.zone,
            LinkScope::Regional => &self.region,
            LinkScope::Global => "",
        }
    }

    /// Check names and placement, then register creation intent.
    pub fn validate_and_register(&self, workflow: &Workflow, kind: ResourceKind, step_id: &str) -> Result<()> {
        let label = kind.label();
        if self.name.is_empty() {
            return Err(FlowError::invalid_input(format!("{label} is missing a Name")));
        }
        if !is_rfc1035_label(&self.real_name) {
            return Err(FlowError::invalid_input(format!(
                "{label} name {:?} does not conform to the naming grammar",
                self.real_name
            )));
        }
        if !is_valid_project_id(&self.project) {
            return Err(FlowError::invalid_input(format!("{label} {:?} has invalid project {:?}", self.name, self.project)));
        }
        match kind.template().scope() {
            LinkScope::Zonal if self.zone.is_empty() => {
                return Err(FlowError::invalid_input(format!("{label} {:?} is missing a zone", self.name)));
            }
            LinkScope::Regional if self.region.is_empty() => {
                return Err(FlowError::invalid_input(format!("{label} {:?} is missing a region", self.name)));
            }
            _ => {}
        }

        let resource = Resource {
            logical_name: self.name.clone(),
            real_name: self.real_name.clone(),
            project: self.project.clone(),
            locus: self.locus(kind).to_string(),
            link: self.link.clone(),
            no_cleanup: self.no_cleanup,
            exact_name: self.exact_name,
            creator: step_id.to_string(),
            deleter: None,
            users: Vec::new(),
            deprecation_state: None,
        };
        workflow.registries.create(kind, resource, self.over_write)
    }

    /// Delete the pre-existing cloud resource an `OverWrite` creation is
    /// about to replace. Absence is fine; other failures are not.
    pub async fn delete_existing(&self, workflow: &Workflow, kind: ResourceKind) -> Result<()> {
        use gantry_compute::ComputeError;
        match crate::registry::delete_by_kind(workflow.api.as_ref(), kind, &self.project, self.locus(kind), &self.real_name).await {
            Ok(()) => Ok(()),
            Err(ComputeError::Http { status: 404, .. }) => Ok(()),
            Err(error) => Err(api_err(error)),
        }
    }

    /// Long-poll `operation` in this resource's scope.
    pub async fn await_operation(&self, workflow: &Workflow, kind: ResourceKind, operation: &Operation) -> Result<()> {
        let scope = match kind.template().scope() {
            LinkScope::Zonal => OperationScope::Zone(&self.zone),
            LinkScope::Regional => OperationScope::Region(&self.region),
            LinkScope::Global => OperationScope::Global,
        };
        wait_for_operation(workflow.api.as_ref(), &self.project, scope, operation)
            .await
            .map_err(api_err)
    }
}
