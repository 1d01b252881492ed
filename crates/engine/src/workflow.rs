//! The workflow aggregate: parse, populate, validate, run, clean up.
//!
//! A workflow's life has three phases. Populate resolves variables over the
//! raw document tree (single pass), adopts defaults, assigns the run id and
//! unique resource names, and recursively populates included and
//! sub-workflows. Validate registers every step's intent with the resource
//! registries, collecting all problems before anything runs. Run stages
//! sources, walks the step DAG concurrently, and always drives auto-cleanup
//! afterwards, folding cleanup failures into the result without masking the
//! primary error.

use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use gantry_compute::ComputeApi;
use gantry_types::{ErrorList, FlowError, Result};
use gantry_util::duration::parse_duration;
use gantry_util::links::region_from_zone;
use gantry_util::names::{is_rfc1035_label, is_valid_project_id, rand_suffix};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::info;

use crate::cancel::CancelSignal;
use crate::model::{Var, VarSpec, WorkflowDoc};
use crate::registry::Registries;
use crate::scheduler;
use crate::sources::{SourceStager, is_gcs_path};
use crate::steps::StepKind;
use crate::vars::Substitutions;

/// Step timeout applied when neither the step nor the workflow names one.
pub const DEFAULT_TIMEOUT: &str = "10m";
/// Length of the generated run id.
const RUN_ID_LEN: usize = 5;

/// A named node of the step DAG.
pub struct Step {
    pub name: String,
    pub timeout: Duration,
    pub depends_on: Vec<String>,
    pub kind: StepKind,
}

/// Pre-populate configuration; overrides win over document fields, and
/// parents use them to push shared state into children.
#[derive(Default)]
struct Overrides {
    project: Option<String>,
    zone: Option<String>,
    gcs_path: Option<String>,
    oauth_path: Option<String>,
    id: Option<String>,
    prefix: Option<String>,
    cancel: Option<CancelSignal>,
    registries: Option<Arc<Registries>>,
    vars: IndexMap<String, String>,
}

/// The workflow aggregate.
pub struct Workflow {
    pub name: String,
    pub project: String,
    pub zone: String,
    /// Derived from the zone.
    pub region: String,
    pub gcs_path: String,
    pub oauth_path: String,
    pub default_timeout: Duration,
    pub vars: IndexMap<String, Var>,
    pub sources: IndexMap<String, String>,
    pub steps: IndexMap<String, Step>,
    /// Run id appended to resource names.
    pub id: String,
    pub username: String,
    pub workflow_dir: PathBuf,
    pub scratch_path: String,
    pub sources_path: String,
    pub logs_path: String,
    pub outs_path: String,
    /// Qualification prefix for step ids; empty on the root workflow.
    pub prefix: String,
    pub cancel: CancelSignal,
    pub api: Arc<dyn ComputeApi>,
    pub stager: Arc<dyn SourceStager>,
    pub registries: Arc<Registries>,
    raw: Value,
    overrides: Overrides,
    populated: bool,
    validated: AtomicBool,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("project", &self.project)
            .field("zone", &self.zone)
            .field("id", &self.id)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Workflow {
    /// Parse a workflow document from a JSON string.
    pub fn from_json(document: &str, api: Arc<dyn ComputeApi>, stager: Arc<dyn SourceStager>) -> Result<Self> {
        let raw: Value = serde_json::from_str(document).map_err(|e| FlowError::from(e).context("parsing workflow document"))?;
        if !raw.is_object() {
            return Err(FlowError::invalid_input("workflow document must be a JSON object"));
        }
        Ok(Self {
            name: String::new(),
            project: String::new(),
            zone: String::new(),
            region: String::new(),
            gcs_path: String::new(),
            oauth_path: String::new(),
            default_timeout: parse_duration(DEFAULT_TIMEOUT).expect("static duration"),
            vars: IndexMap::new(),
            sources: IndexMap::new(),
            steps: IndexMap::new(),
            id: String::new(),
            username: String::new(),
            workflow_dir: std::env::current_dir().unwrap_or_default(),
            scratch_path: String::new(),
            sources_path: String::new(),
            logs_path: String::new(),
            outs_path: String::new(),
            prefix: String::new(),
            cancel: CancelSignal::new(),
            api,
            stager,
            registries: Registries::new(),
            raw,
            overrides: Overrides::default(),
            populated: false,
            validated: AtomicBool::new(false),
        })
    }

    /// Read and parse a workflow document file. Relative paths inside the
    /// document (sources, included workflows) resolve against its directory.
    pub fn from_file(path: impl AsRef<Path>, api: Arc<dyn ComputeApi>, stager: Arc<dyn SourceStager>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| FlowError::from(e).context(format!("reading workflow file {}", path.display())))?;
        let mut workflow = Self::from_json(&content, api, stager)?;
        if let Some(dir) = path.parent() {
            workflow.workflow_dir = dir.to_path_buf();
        }
        Ok(workflow)
    }

    /// Bind a workflow variable, satisfying `Required` declarations.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.overrides.vars.insert(name.into(), value.into());
    }

    pub fn set_project(&mut self, project: impl Into<String>) {
        self.overrides.project = Some(project.into());
    }

    pub fn set_zone(&mut self, zone: impl Into<String>) {
        self.overrides.zone = Some(zone.into());
    }

    pub fn set_gcs_path(&mut self, gcs_path: impl Into<String>) {
        self.overrides.gcs_path = Some(gcs_path.into());
    }

    pub fn set_oauth_path(&mut self, oauth_path: impl Into<String>) {
        self.overrides.oauth_path = Some(oauth_path.into());
    }

    /// Qualified id of a step in this workflow.
    pub fn qualified(&self, step_name: &str) -> String {
        format!("{}{}", self.prefix, step_name)
    }

    /// Resolve variables, adopt defaults and canonicalize every step
    /// payload. Idempotent.
    pub fn populate(&mut self) -> Result<()> {
        if self.populated {
            return Ok(());
        }

        // Vars come from the raw document so their values are available to
        // the substitution pass itself.
        let mut vars: IndexMap<String, Var> = match self.raw.get("Vars") {
            Some(raw_vars) => serde_json::from_value::<IndexMap<String, VarSpec>>(raw_vars.clone())
                .map_err(|e| FlowError::from(e).context("parsing Vars"))?
                .into_iter()
                .map(|(name, spec)| (name, spec.into_var()))
                .collect(),
            None => IndexMap::new(),
        };
        for (name, value) in &self.overrides.vars {
            vars.entry(name.clone()).or_default().value = value.clone();
        }
        for (name, var) in &vars {
            if var.required && var.value.is_empty() {
                return Err(FlowError::invalid_input(format!("required var {name:?} is unset")));
            }
        }

        self.id = self.overrides.id.clone().unwrap_or_else(|| rand_suffix(RUN_ID_LEN));
        self.username = std::env::var("USER").ok().filter(|u| !u.is_empty()).unwrap_or_else(|| "gantry".into());
        if let Some(prefix) = &self.overrides.prefix {
            self.prefix = prefix.clone();
        }
        if let Some(cancel) = &self.overrides.cancel {
            self.cancel = cancel.clone();
        }
        if let Some(registries) = &self.overrides.registries {
            self.registries = registries.clone();
        }

        // Autovars reflect the document as written; substituted field values
        // are adopted right after the pass.
        let peek = |raw: &Value, key: &str| raw.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        self.name = peek(&self.raw, "Name");
        self.project = self.overrides.project.clone().unwrap_or_else(|| peek(&self.raw, "Project"));
        self.zone = self.overrides.zone.clone().unwrap_or_else(|| peek(&self.raw, "Zone"));
        self.gcs_path = self.overrides.gcs_path.clone().unwrap_or_else(|| peek(&self.raw, "GCSPath"));
        self.oauth_path = self.overrides.oauth_path.clone().unwrap_or_else(|| peek(&self.raw, "OAuthPath"));
        self.region = region_from_zone(&self.zone).unwrap_or_default().to_string();
        self.recompute_paths();

        let now = Utc::now();
        let mut substitutions = Substitutions::new();
        substitutions.set("NAME", &self.name);
        substitutions.set("ID", &self.id);
        substitutions.set("ZONE", &self.zone);
        substitutions.set("PROJECT", &self.project);
        substitutions.set("DATE", now.format("%Y%m%d").to_string());
        substitutions.set("DATETIME", now.format("%Y%m%d%H%M%S").to_string());
        substitutions.set("TIMESTAMP", now.timestamp().to_string());
        substitutions.set("USERNAME", &self.username);
        substitutions.set("WFDIR", self.workflow_dir.display().to_string());
        substitutions.set("GCSPATH", &self.gcs_path);
        substitutions.set("SCRATCHPATH", &self.scratch_path);
        substitutions.set("SOURCESPATH", &self.sources_path);
        substitutions.set("LOGSPATH", &self.logs_path);
        substitutions.set("OUTSPATH", &self.outs_path);
        for (name, var) in &vars {
            substitutions.set(name, &var.value);
        }

        let mut doc_value = self.raw.clone();
        if let Some(map) = doc_value.as_object_mut() {
            map.remove("Vars");
        }
        substitutions.apply_value(&mut doc_value);
        let doc: WorkflowDoc =
            serde_json::from_value(doc_value).map_err(|e| FlowError::from(e).context("parsing workflow document"))?;

        self.name = doc.name;
        if self.overrides.project.is_none() {
            self.project = doc.project;
        }
        if self.overrides.zone.is_none() {
            self.zone = doc.zone;
        }
        if self.overrides.gcs_path.is_none() {
            self.gcs_path = doc.gcs_path;
        }
        if self.overrides.oauth_path.is_none() {
            self.oauth_path = doc.oauth_path;
        }
        self.region = region_from_zone(&self.zone).unwrap_or_default().to_string();
        self.recompute_paths();

        if !doc.default_timeout.is_empty() {
            self.default_timeout = parse_duration(&doc.default_timeout)
                .map_err(|e| FlowError::invalid_input(format!("DefaultTimeout: {e}")).with_source(e))?;
        }
        self.sources = doc.sources;
        self.vars = vars;

        let mut steps = IndexMap::new();
        for (name, spec) in doc.steps {
            let timeout = if spec.timeout.is_empty() {
                self.default_timeout
            } else {
                parse_duration(&spec.timeout)
                    .map_err(|e| FlowError::invalid_input(format!("step {name:?} Timeout: {e}")).with_source(e))?
            };
            let kind = spec.into_kind().map_err(|e| e.context(format!("step {name:?}")))?;
            let mut depends_on = doc.dependencies.get(&name).cloned().unwrap_or_default();
            let mut seen = HashSet::new();
            depends_on.retain(|dep| seen.insert(dep.clone()));
            steps.insert(
                name.clone(),
                Step {
                    name,
                    timeout,
                    depends_on,
                    kind,
                },
            );
        }
        self.steps = steps;

        // Steps are taken out so payload populate can reach the workflow.
        let mut steps = mem::take(&mut self.steps);
        for (name, step) in steps.iter_mut() {
            step.kind
                .populate(self, name)
                .map_err(|e| e.context(format!("populating step {name:?}")))?;
        }
        self.steps = steps;

        self.populated = true;
        Ok(())
    }

    fn recompute_paths(&mut self) {
        if self.gcs_path.is_empty() {
            self.scratch_path = String::new();
            self.sources_path = String::new();
            self.logs_path = String::new();
            self.outs_path = String::new();
            return;
        }
        let base = self.gcs_path.trim_end_matches('/');
        self.scratch_path = format!("{base}/{}", self.id);
        self.sources_path = format!("{}/sources", self.scratch_path);
        self.logs_path = format!("{}/logs", self.scratch_path);
        self.outs_path = format!("{}/outs", self.scratch_path);
    }

    /// Check the workflow and register every step's intent. All problems are
    /// collected into one aggregate; nothing runs when validate fails. A
    /// successful validation is recorded and not repeated: registrations are
    /// not re-playable, so `run` after an explicit `validate` must not
    /// re-register every creation.
    pub fn validate(&self) -> Result<()> {
        if !self.populated {
            return Err(FlowError::invalid_input("workflow must be populated before validation"));
        }
        if self.validated.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut errors = ErrorList::new();
        if !is_rfc1035_label(&self.name) {
            errors.add(FlowError::invalid_input(format!(
                "workflow name {:?} is missing or does not conform to the naming grammar",
                self.name
            )));
        }
        if !is_valid_project_id(&self.project) {
            errors.add(FlowError::invalid_input(format!("missing or invalid Project {:?}", self.project)));
        }
        if self.zone.is_empty() {
            errors.add(FlowError::invalid_input("missing Zone"));
        }
        if !self.sources.is_empty() && self.gcs_path.is_empty() {
            errors.add(FlowError::invalid_input("Sources are declared but no GCSPath is set"));
        }
        if !self.gcs_path.is_empty() && !is_gcs_path(&self.gcs_path) {
            errors.add(FlowError::invalid_input(format!("GCSPath {:?} is not a gs:// path", self.gcs_path)));
        }

        for (name, step) in &self.steps {
            for dep in &step.depends_on {
                if !self.steps.contains_key(dep) {
                    errors.add(FlowError::invalid_input(format!(
                        "step {name:?} depends on unknown step {dep:?}"
                    )));
                }
            }
        }
        let order = match self.topo_order() {
            Ok(order) => order,
            Err(error) => {
                errors.add(error);
                return errors.into_result();
            }
        };
        if !errors.is_empty() {
            return errors.into_result();
        }

        self.register_graph();
        for name in order {
            let step = &self.steps[&name];
            if let Err(error) = step.kind.validate(self, &name) {
                errors.add(error.context(format!("step {name:?}")));
            }
        }
        let result = errors.into_result();
        if result.is_ok() {
            self.validated.store(true, Ordering::Release);
        }
        result
    }

    /// Record this workflow's steps and dependency edges into the shared
    /// dependency graph. Idempotent.
    pub(crate) fn register_graph(&self) {
        let mut graph = self.registries.graph.lock().expect("dependency graph lock poisoned");
        for (name, step) in &self.steps {
            let step_id = self.qualified(name);
            graph.add_step(&step_id);
            for dep in &step.depends_on {
                graph.add_edge(&step_id, &self.qualified(dep));
            }
        }
    }

    /// Kahn topological order over the local steps; insertion order breaks
    /// ties so validation is deterministic.
    fn topo_order(&self) -> Result<Vec<String>> {
        let mut remaining: IndexMap<&String, HashSet<&String>> = self
            .steps
            .iter()
            .map(|(name, step)| (name, step.depends_on.iter().filter(|d| self.steps.contains_key(*d)).collect()))
            .collect();
        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let Some(next) = remaining
                .iter()
                .find(|(_, deps)| deps.iter().all(|d| !remaining.contains_key(*d)))
                .map(|(name, _)| (*name).clone())
            else {
                let stuck: Vec<&str> = remaining.keys().map(|n| n.as_str()).collect();
                return Err(FlowError::invalid_input(format!(
                    "workflow has a dependency cycle involving steps {stuck:?}"
                )));
            };
            remaining.shift_remove(&next);
            order.push(next);
        }
        Ok(order)
    }

    /// Populate, validate, stage sources, execute the DAG and clean up.
    /// Cleanup always runs after the DAG was attempted; its failures never
    /// mask the primary error.
    pub async fn run(mut self) -> Result<()> {
        self.populate()?;
        self.validate()?;
        let workflow = Arc::new(self);
        info!(workflow = %workflow.name, id = %workflow.id, steps = workflow.steps.len(), "workflow starting");

        let run_result = match workflow.upload_sources().await {
            Ok(()) => scheduler::run_steps(&workflow).await,
            Err(error) => Err(error),
        };

        let cleanup_failures = workflow.registries.cleanup(workflow.api.as_ref()).await;
        let mut errors = ErrorList::new();
        if let Err(error) = run_result {
            errors.add(error);
        }
        errors.extend(cleanup_failures);
        let result = errors.into_result();
        match &result {
            Ok(()) => info!(workflow = %workflow.name, "workflow finished"),
            Err(error) => info!(workflow = %workflow.name, error = %error, "workflow failed"),
        }
        result
    }

    /// Stage every `Sources` entry under the run's sources prefix.
    pub(crate) async fn upload_sources(&self) -> Result<()> {
        for (key, origin) in &self.sources {
            let destination = format!("{}/{}", self.sources_path, key);
            if is_gcs_path(origin) {
                self.stager.copy_object(origin, &destination).await?;
            } else {
                let local = if Path::new(origin).is_absolute() {
                    PathBuf::from(origin)
                } else {
                    self.workflow_dir.join(origin)
                };
                self.stager
                    .upload(&local, &destination)
                    .await
                    .map_err(|e| e.context(format!("staging source {key:?}")))?;
            }
        }
        Ok(())
    }

    /// Build an included or isolated child workflow rooted at a document
    /// path relative to this workflow's directory.
    pub(crate) fn child_workflow(&self, path: &str, vars: &IndexMap<String, String>, step_name: &str, isolated: bool) -> Result<Workflow> {
        let file = self.workflow_dir.join(path);
        let mut child = Workflow::from_file(&file, self.api.clone(), self.stager.clone())?;
        child.overrides.project = Some(self.project.clone());
        child.overrides.zone = Some(self.zone.clone());
        child.overrides.gcs_path = Some(self.gcs_path.clone());
        child.overrides.oauth_path = Some(self.oauth_path.clone());
        child.overrides.id = Some(self.id.clone());
        child.overrides.prefix = Some(format!("{}/", self.qualified(step_name)));
        child.overrides.cancel = Some(self.cancel.clone());
        if !isolated {
            child.overrides.registries = Some(self.registries.clone());
        }
        for (name, value) in vars {
            child.overrides.vars.insert(name.clone(), value.clone());
        }
        Ok(child)
    }
}
