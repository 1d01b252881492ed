//! Per-kind resource registries and connection bookkeeping.
//!
//! Registries are populated during validate: `Create*` steps register
//! creation intent, referencing steps register usage, deleting steps claim
//! deletion. Each call checks the lifecycle invariants against the shared
//! dependency graph: users must transitively depend on creators, deleters on
//! every user, reconnectors on the previous disconnector. At workflow end
//! the cleanup driver deletes whatever was created and not explicitly
//! deleted or exempted.
//!
//! All registry calls are serialized behind per-registry mutexes. Validate
//! is single-threaded per workflow, so cross-registry invariants hold
//! without a global lock.

use std::sync::{Arc, Mutex};

use gantry_compute::{ComputeApi, OperationScope, wait_for_operation};
use gantry_types::{ErrorKind, FlowError, Result};
use gantry_util::links::{LinkScope, UrlTemplate, templates};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::depgraph::DepGraph;

/// Deleter recorded for resources removed by the cleanup driver.
const CLEANUP_STEP: &str = "__cleanup__";

/// Resource kinds with their own registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Disk,
    Image,
    MachineImage,
    Instance,
    Network,
    Subnetwork,
    Snapshot,
    TargetInstance,
    ForwardingRule,
}

impl ResourceKind {
    pub fn template(&self) -> &'static UrlTemplate {
        match self {
            ResourceKind::Disk => &templates::DISK,
            ResourceKind::Image => &templates::IMAGE,
            ResourceKind::MachineImage => &templates::MACHINE_IMAGE,
            ResourceKind::Instance => &templates::INSTANCE,
            ResourceKind::Network => &templates::NETWORK,
            ResourceKind::Subnetwork => &templates::SUBNETWORK,
            ResourceKind::Snapshot => &templates::SNAPSHOT,
            ResourceKind::TargetInstance => &templates::TARGET_INSTANCE,
            ResourceKind::ForwardingRule => &templates::FORWARDING_RULE,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Disk => "disk",
            ResourceKind::Image => "image",
            ResourceKind::MachineImage => "machine image",
            ResourceKind::Instance => "instance",
            ResourceKind::Network => "network",
            ResourceKind::Subnetwork => "subnetwork",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::TargetInstance => "target instance",
            ResourceKind::ForwardingRule => "forwarding rule",
        }
    }
}

/// Bookkeeping envelope for one created resource.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Name as written in the workflow document.
    pub logical_name: String,
    /// Uniqued name sent to the cloud.
    pub real_name: String,
    pub project: String,
    /// Zone or region; empty for global kinds.
    pub locus: String,
    /// Fully-qualified link.
    pub link: String,
    pub no_cleanup: bool,
    pub exact_name: bool,
    /// Qualified id of the creating step.
    pub creator: String,
    /// Qualified id of the deleting step, once claimed.
    pub deleter: Option<String>,
    /// Qualified ids of steps that registered usage.
    pub users: Vec<String>,
    /// Image deprecation state, when one was applied.
    pub deprecation_state: Option<String>,
}

/// Components a reference resolves to at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub project: String,
    pub locus: String,
    pub name: String,
    pub link: String,
}

/// Registry for a single resource kind.
#[derive(Debug)]
pub struct KindRegistry {
    kind: ResourceKind,
    resources: IndexMap<String, Resource>,
    /// Creations displaced by an overwrite. Kept for real-name uniqueness
    /// and the cleanup accounting.
    replaced: Vec<Resource>,
}

impl KindRegistry {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            resources: IndexMap::new(),
            replaced: Vec::new(),
        }
    }

    /// Register creation intent. Fails when another active creation holds
    /// the same document name without `over_write`, or when the real name
    /// collides with any known resource.
    pub fn reg_create(&mut self, resource: Resource, over_write: bool) -> Result<()> {
        let label = self.kind.label();
        if let Some(existing) = self.resources.get(&resource.logical_name) {
            if existing.deleter.is_none() && !over_write {
                return Err(FlowError::new(
                    ErrorKind::MultipleCreators,
                    format!(
                        "{label} {:?} is already created by step {:?}",
                        resource.logical_name, existing.creator
                    ),
                ));
            }
            let mut displaced = self.resources.shift_remove(&resource.logical_name).unwrap();
            if displaced.deleter.is_none() {
                displaced.deleter = Some(resource.creator.clone());
            }
            self.replaced.push(displaced);
        }

        // Uniqueness is judged against creations still slated to exist; an
        // overwritten predecessor legitimately frees its name.
        let real_collision = self
            .resources
            .values()
            .chain(self.replaced.iter())
            .any(|existing| existing.deleter.is_none() && existing.real_name == resource.real_name);
        if real_collision {
            return Err(FlowError::invalid_input(format!(
                "duplicate {label} name {:?} after uniquing",
                resource.real_name
            )));
        }

        self.resources.insert(resource.logical_name.clone(), resource);
        Ok(())
    }

    /// Register that `user` references `reference`. Registered names check
    /// creator dependency; values matching the kind's link grammar pass as
    /// external resources.
    pub fn reg_use(&mut self, graph: &DepGraph, reference: &str, user: &str) -> Result<String> {
        let label = self.kind.label();
        if let Some(resource) = self.resources.get_mut(reference) {
            if let Some(deleter) = &resource.deleter {
                return Err(FlowError::new(
                    ErrorKind::ResourceDoesNotExist,
                    format!("{label} {reference:?} is deleted by step {deleter:?}"),
                ));
            }
            if let Some(state) = &resource.deprecation_state
                && matches!(state.as_str(), "OBSOLETE" | "DELETED")
            {
                return Err(FlowError::new(
                    ErrorKind::ImageObsolete,
                    format!("{label} {reference:?} is {state}"),
                ));
            }
            if !graph.depends_on(user, &resource.creator) {
                return Err(FlowError::new(
                    ErrorKind::MissingDependency,
                    format!(
                        "step {user:?} uses {label} {reference:?} without depending on its creator {:?}",
                        resource.creator
                    ),
                ));
            }
            resource.users.push(user.to_string());
            return Ok(resource.link.clone());
        }

        if self.kind.template().matches(reference) {
            // External resource; nothing to track.
            return Ok(reference.to_string());
        }

        Err(FlowError::new(
            ErrorKind::ResourceDoesNotExist,
            format!("no {label} {reference:?} is created in this workflow"),
        ))
    }

    /// Claim deletion of `name` by `deleter`.
    pub fn reg_delete(&mut self, graph: &DepGraph, name: &str, deleter: &str) -> Result<()> {
        let label = self.kind.label();
        let Some(resource) = self.resources.get_mut(name) else {
            return Err(FlowError::new(
                ErrorKind::ResourceDoesNotExist,
                format!("no {label} {name:?} is created in this workflow"),
            ));
        };
        if let Some(existing) = &resource.deleter {
            return Err(FlowError::invalid_input(format!(
                "{label} {name:?} is already deleted by step {existing:?}"
            )));
        }
        if !graph.depends_on(deleter, &resource.creator) {
            return Err(FlowError::new(
                ErrorKind::MissingDependency,
                format!(
                    "step {deleter:?} deletes {label} {name:?} without depending on its creator {:?}",
                    resource.creator
                ),
            ));
        }
        for user in &resource.users {
            if !graph.depends_on(deleter, user) {
                return Err(FlowError::new(
                    ErrorKind::MissingDependency,
                    format!("{label} {name:?} is used by step {user:?}, which is not ordered before deleter {deleter:?}"),
                ));
            }
        }
        resource.deleter = Some(deleter.to_string());
        Ok(())
    }

    pub fn get(&self, logical_name: &str) -> Option<&Resource> {
        self.resources.get(logical_name)
    }

    /// Record a deprecation state change for `name`.
    pub fn set_deprecation_state(&mut self, name: &str, state: &str) {
        if let Some(resource) = self.resources.get_mut(name) {
            resource.deprecation_state = Some(state.to_string());
        }
    }

    /// Resolve a reference into concrete call components, preferring
    /// registered resources, then link parsing, then workflow defaults.
    pub fn resolve(&self, reference: &str, default_project: &str, default_locus: &str) -> ResolvedRef {
        if let Some(resource) = self.resources.get(reference) {
            return ResolvedRef {
                project: resource.project.clone(),
                locus: resource.locus.clone(),
                name: resource.real_name.clone(),
                link: resource.link.clone(),
            };
        }
        let template = self.kind.template();
        if let Some(parsed) = template.parse(reference) {
            let project = parsed.project.unwrap_or_else(|| default_project.to_string());
            let locus = parsed.locus.unwrap_or_else(|| default_locus.to_string());
            let link = template.link(&project, &locus, &parsed.name);
            return ResolvedRef {
                project,
                locus,
                name: parsed.name,
                link,
            };
        }
        ResolvedRef {
            project: default_project.to_string(),
            locus: default_locus.to_string(),
            name: reference.to_string(),
            link: template.link(default_project, default_locus, reference),
        }
    }

    fn drain_for_cleanup(&mut self) -> Vec<Resource> {
        let mut doomed = Vec::new();
        for resource in self.resources.values_mut().rev() {
            if resource.no_cleanup || resource.deleter.is_some() {
                continue;
            }
            resource.deleter = Some(CLEANUP_STEP.to_string());
            doomed.push(resource.clone());
        }
        doomed
    }
}

/// A live or closed connection between two resources.
#[derive(Debug, Clone)]
pub struct Connection {
    pub connector: String,
    pub disconnector: Option<String>,
}

/// Attachment/connection bookkeeping (disk↔instance, subnetwork↔instance).
#[derive(Debug)]
pub struct ConnectionRegistry {
    what: &'static str,
    connections: IndexMap<(String, String), Vec<Connection>>,
}

impl ConnectionRegistry {
    fn new(what: &'static str) -> Self {
        Self {
            what,
            connections: IndexMap::new(),
        }
    }

    /// Register a connection of `a` to `b` by `step`. A previous connection
    /// must have a disconnector the new connector transitively depends on.
    pub fn reg_connect(&mut self, graph: &DepGraph, a: &str, b: &str, step: &str) -> Result<()> {
        let what = self.what;
        let history = self.connections.entry((a.to_string(), b.to_string())).or_default();
        if let Some(last) = history.last() {
            match &last.disconnector {
                None => {
                    return Err(FlowError::new(
                        ErrorKind::ResourceAlreadyExists,
                        format!("{what} {a:?}→{b:?} already made by step {:?}", last.connector),
                    ));
                }
                Some(disconnector) => {
                    if !graph.depends_on(step, disconnector) {
                        return Err(FlowError::new(
                            ErrorKind::MissingDependency,
                            format!("step {step:?} remakes {what} {a:?}→{b:?} without depending on disconnector {disconnector:?}"),
                        ));
                    }
                }
            }
        }
        history.push(Connection {
            connector: step.to_string(),
            disconnector: None,
        });
        Ok(())
    }

    /// Register disconnection of `a` from `b` by `step`.
    pub fn reg_disconnect(&mut self, graph: &DepGraph, a: &str, b: &str, step: &str) -> Result<()> {
        let what = self.what;
        let Some(last) = self.connections.get_mut(&(a.to_string(), b.to_string())).and_then(|h| h.last_mut()) else {
            return Err(FlowError::invalid_input(format!("no {what} {a:?}→{b:?} exists to undo")));
        };
        if let Some(existing) = &last.disconnector {
            return Err(FlowError::invalid_input(format!(
                "{what} {a:?}→{b:?} is already undone by step {existing:?}"
            )));
        }
        if !graph.depends_on(step, &last.connector) {
            return Err(FlowError::new(
                ErrorKind::MissingDependency,
                format!("step {step:?} undoes {what} {a:?}→{b:?} without depending on connector {:?}", last.connector),
            ));
        }
        last.disconnector = Some(step.to_string());
        Ok(())
    }

    /// Atomically mark `step` as disconnector of every live connection
    /// involving `b`.
    pub fn reg_disconnect_all(&mut self, graph: &DepGraph, b: &str, step: &str) -> Result<()> {
        let what = self.what;
        // Validate the whole batch before mutating any of it.
        for ((from, to), history) in &self.connections {
            if from != b && to != b {
                continue;
            }
            if let Some(last) = history.last()
                && last.disconnector.is_none()
                && !graph.depends_on(step, &last.connector)
            {
                return Err(FlowError::new(
                    ErrorKind::MissingDependency,
                    format!(
                        "step {step:?} undoes {what} {from:?}→{to:?} without depending on connector {:?}",
                        last.connector
                    ),
                ));
            }
        }
        for ((from, to), history) in self.connections.iter_mut() {
            if from != b && to != b {
                continue;
            }
            if let Some(last) = history.last_mut()
                && last.disconnector.is_none()
            {
                last.disconnector = Some(step.to_string());
            }
        }
        Ok(())
    }

    pub fn live(&self, a: &str, b: &str) -> bool {
        self.connections
            .get(&(a.to_string(), b.to_string()))
            .and_then(|h| h.last())
            .is_some_and(|c| c.disconnector.is_none())
    }
}

/// The per-workflow registry aggregate. Includes share their parent's;
/// sub-workflows get a fresh, isolated one.
pub struct Registries {
    pub graph: Mutex<DepGraph>,
    disks: Mutex<KindRegistry>,
    images: Mutex<KindRegistry>,
    machine_images: Mutex<KindRegistry>,
    instances: Mutex<KindRegistry>,
    networks: Mutex<KindRegistry>,
    subnetworks: Mutex<KindRegistry>,
    snapshots: Mutex<KindRegistry>,
    target_instances: Mutex<KindRegistry>,
    forwarding_rules: Mutex<KindRegistry>,
    pub disk_attachments: Mutex<ConnectionRegistry>,
    pub subnetwork_connections: Mutex<ConnectionRegistry>,
}

/// Kind order for cleanup: attachment holders first, their targets after.
const CLEANUP_ORDER: &[ResourceKind] = &[
    ResourceKind::ForwardingRule,
    ResourceKind::TargetInstance,
    ResourceKind::Instance,
    ResourceKind::Disk,
    ResourceKind::Subnetwork,
    ResourceKind::Network,
    ResourceKind::Image,
    ResourceKind::MachineImage,
    ResourceKind::Snapshot,
];

impl Registries {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            graph: Mutex::new(DepGraph::new()),
            disks: Mutex::new(KindRegistry::new(ResourceKind::Disk)),
            images: Mutex::new(KindRegistry::new(ResourceKind::Image)),
            machine_images: Mutex::new(KindRegistry::new(ResourceKind::MachineImage)),
            instances: Mutex::new(KindRegistry::new(ResourceKind::Instance)),
            networks: Mutex::new(KindRegistry::new(ResourceKind::Network)),
            subnetworks: Mutex::new(KindRegistry::new(ResourceKind::Subnetwork)),
            snapshots: Mutex::new(KindRegistry::new(ResourceKind::Snapshot)),
            target_instances: Mutex::new(KindRegistry::new(ResourceKind::TargetInstance)),
            forwarding_rules: Mutex::new(KindRegistry::new(ResourceKind::ForwardingRule)),
            disk_attachments: Mutex::new(ConnectionRegistry::new("disk attachment")),
            subnetwork_connections: Mutex::new(ConnectionRegistry::new("subnetwork connection")),
        })
    }

    pub fn of(&self, kind: ResourceKind) -> &Mutex<KindRegistry> {
        match kind {
            ResourceKind::Disk => &self.disks,
            ResourceKind::Image => &self.images,
            ResourceKind::MachineImage => &self.machine_images,
            ResourceKind::Instance => &self.instances,
            ResourceKind::Network => &self.networks,
            ResourceKind::Subnetwork => &self.subnetworks,
            ResourceKind::Snapshot => &self.snapshots,
            ResourceKind::TargetInstance => &self.target_instances,
            ResourceKind::ForwardingRule => &self.forwarding_rules,
        }
    }

    pub fn create(&self, kind: ResourceKind, resource: Resource, over_write: bool) -> Result<()> {
        self.of(kind).lock().expect("resource registry lock poisoned").reg_create(resource, over_write)
    }

    pub fn use_resource(&self, kind: ResourceKind, reference: &str, user: &str) -> Result<String> {
        let graph = self.graph.lock().expect("dependency graph lock poisoned");
        self.of(kind).lock().expect("resource registry lock poisoned").reg_use(&graph, reference, user)
    }

    pub fn delete_resource(&self, kind: ResourceKind, name: &str, deleter: &str) -> Result<()> {
        let graph = self.graph.lock().expect("dependency graph lock poisoned");
        self.of(kind).lock().expect("resource registry lock poisoned").reg_delete(&graph, name, deleter)
    }

    pub fn resolve(&self, kind: ResourceKind, reference: &str, default_project: &str, default_locus: &str) -> ResolvedRef {
        self.of(kind).lock().expect("resource registry lock poisoned").resolve(reference, default_project, default_locus)
    }

    pub fn connect(&self, registry: &Mutex<ConnectionRegistry>, a: &str, b: &str, step: &str) -> Result<()> {
        let graph = self.graph.lock().expect("dependency graph lock poisoned");
        registry.lock().expect("connection registry lock poisoned").reg_connect(&graph, a, b, step)
    }

    pub fn disconnect(&self, registry: &Mutex<ConnectionRegistry>, a: &str, b: &str, step: &str) -> Result<()> {
        let graph = self.graph.lock().expect("dependency graph lock poisoned");
        registry.lock().expect("connection registry lock poisoned").reg_disconnect(&graph, a, b, step)
    }

    pub fn disconnect_all(&self, registry: &Mutex<ConnectionRegistry>, b: &str, step: &str) -> Result<()> {
        let graph = self.graph.lock().expect("dependency graph lock poisoned");
        registry.lock().expect("connection registry lock poisoned").reg_disconnect_all(&graph, b, step)
    }

    pub fn depends_on(&self, dependent: &str, dependency: &str) -> bool {
        self.graph.lock().expect("dependency graph lock poisoned").depends_on(dependent, dependency)
    }

    /// Delete every created resource that was neither exempted nor already
    /// deleted, attachment holders first, newest first within a kind.
    /// Failures are reported, never raised past the caller's aggregation.
    pub async fn cleanup(&self, api: &dyn ComputeApi) -> Vec<FlowError> {
        let mut failures = Vec::new();
        for &kind in CLEANUP_ORDER {
            let doomed = self.of(kind).lock().expect("resource registry lock poisoned").drain_for_cleanup();
            for resource in doomed {
                info!(kind = kind.label(), name = %resource.real_name, "cleaning up resource");
                if let Err(error) = delete_by_kind(api, kind, &resource.project, &resource.locus, &resource.real_name).await {
                    warn!(kind = kind.label(), name = %resource.real_name, error = %error, "cleanup delete failed");
                    failures.push(
                        FlowError::new(
                            ErrorKind::CleanupFailed,
                            format!("deleting {} {:?}: {error}", kind.label(), resource.real_name),
                        )
                        .with_source(error),
                    );
                }
            }
        }
        failures
    }
}

/// Issue the kind-appropriate delete call and wait out its operation.
pub(crate) async fn delete_by_kind(
    api: &dyn ComputeApi,
    kind: ResourceKind,
    project: &str,
    locus: &str,
    name: &str,
) -> std::result::Result<(), gantry_compute::ComputeError> {
    let operation = match kind {
        ResourceKind::Disk => api.delete_disk(project, locus, name).await?,
        ResourceKind::Image => api.delete_image(project, name).await?,
        ResourceKind::MachineImage => api.delete_machine_image(project, name).await?,
        ResourceKind::Instance => api.delete_instance(project, locus, name).await?,
        ResourceKind::Network => api.delete_network(project, name).await?,
        ResourceKind::Subnetwork => api.delete_subnetwork(project, locus, name).await?,
        ResourceKind::Snapshot => api.delete_snapshot(project, name).await?,
        ResourceKind::TargetInstance => api.delete_target_instance(project, locus, name).await?,
        ResourceKind::ForwardingRule => api.delete_forwarding_rule(project, locus, name).await?,
    };
    let scope = match kind.template().scope() {
        LinkScope::Zonal => OperationScope::Zone(locus),
        LinkScope::Regional => OperationScope::Region(locus),
        LinkScope::Global => OperationScope::Global,
    };
    wait_for_operation(api, project, scope, &operation).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str, creator: &str) -> Resource {
        Resource {
            logical_name: name.to_string(),
            real_name: format!("{name}-abcde"),
            project: "p".into(),
            locus: "us-central1-a".into(),
            link: format!("projects/p/zones/us-central1-a/disks/{name}-abcde"),
            no_cleanup: false,
            exact_name: false,
            creator: creator.to_string(),
            deleter: None,
            users: Vec::new(),
            deprecation_state: None,
        }
    }

    fn graph_abc() -> DepGraph {
        let mut graph = DepGraph::new();
        graph.add_edge("use", "create");
        graph.add_edge("delete", "use");
        graph.add_step("stranger");
        graph
    }

    #[test]
    fn duplicate_creation_without_overwrite_is_rejected() {
        let mut registry = KindRegistry::new(ResourceKind::Disk);
        registry.reg_create(resource("d", "s1"), false).unwrap();
        let mut second = resource("d", "s2");
        second.real_name = "d-fghij".into();
        let error = registry.reg_create(second, false).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MultipleCreators);
    }

    #[test]
    fn overwrite_repoints_earlier_creation_to_new_creator() {
        let mut registry = KindRegistry::new(ResourceKind::Disk);
        registry.reg_create(resource("d", "s1"), false).unwrap();
        let mut second = resource("d", "s2");
        second.real_name = "d-fghij".into();
        registry.reg_create(second, true).unwrap();

        assert_eq!(registry.get("d").unwrap().creator, "s2");
        assert_eq!(registry.replaced.len(), 1);
        assert_eq!(registry.replaced[0].deleter.as_deref(), Some("s2"));
    }

    #[test]
    fn real_name_collision_is_invalid_input() {
        let mut registry = KindRegistry::new(ResourceKind::Disk);
        let mut first = resource("d1", "s1");
        first.real_name = "fixed".into();
        first.exact_name = true;
        registry.reg_create(first, false).unwrap();

        let mut second = resource("d2", "s2");
        second.real_name = "fixed".into();
        second.exact_name = true;
        let error = registry.reg_create(second, false).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn use_requires_dependency_on_creator() {
        let graph = graph_abc();
        let mut registry = KindRegistry::new(ResourceKind::Disk);
        registry.reg_create(resource("d", "create"), false).unwrap();

        let link = registry.reg_use(&graph, "d", "use").expect("dependent use");
        assert!(link.ends_with("/disks/d-abcde"));

        let error = registry.reg_use(&graph, "d", "stranger").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MissingDependency);
    }

    #[test]
    fn use_of_unknown_name_is_not_found_but_links_pass() {
        let graph = DepGraph::new();
        let mut registry = KindRegistry::new(ResourceKind::Image);
        let error = registry.reg_use(&graph, "ghost", "s").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ResourceDoesNotExist);

        let external = "projects/debian-cloud/global/images/debian-11";
        assert_eq!(registry.reg_use(&graph, external, "s").unwrap(), external);
    }

    #[test]
    fn delete_orders_against_users() {
        let graph = graph_abc();
        let mut registry = KindRegistry::new(ResourceKind::Disk);
        registry.reg_create(resource("d", "create"), false).unwrap();
        registry.reg_use(&graph, "d", "use").unwrap();

        let error = registry.reg_delete(&graph, "d", "stranger").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MissingDependency);

        registry.reg_delete(&graph, "d", "delete").expect("ordered delete");
        let error = registry.reg_delete(&graph, "d", "delete").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidInput, "second delete must fail");
    }

    #[test]
    fn used_after_delete_reports_missing_resource() {
        let graph = graph_abc();
        let mut registry = KindRegistry::new(ResourceKind::Disk);
        registry.reg_create(resource("d", "create"), false).unwrap();
        registry.reg_delete(&graph, "d", "delete").unwrap();
        let error = registry.reg_use(&graph, "d", "delete").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ResourceDoesNotExist);
    }

    #[test]
    fn obsolete_image_use_is_rejected() {
        let graph = graph_abc();
        let mut registry = KindRegistry::new(ResourceKind::Image);
        registry.reg_create(resource("img", "create"), false).unwrap();
        registry.set_deprecation_state("img", "OBSOLETE");
        let error = registry.reg_use(&graph, "img", "use").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ImageObsolete);
    }

    #[test]
    fn connection_accepts_one_disconnector_and_orders_reconnects() {
        let mut graph = DepGraph::new();
        graph.add_edge("s2", "s1");
        graph.add_step("s3");
        let mut connections = ConnectionRegistry::new("subnetwork connection");

        connections.reg_connect(&graph, "i", "n", "s1").unwrap();
        connections.reg_disconnect(&graph, "i", "n", "s2").unwrap();

        // s3 does not depend on the disconnector s2.
        let error = connections.reg_connect(&graph, "i", "n", "s3").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MissingDependency);
        assert!(error.to_string().contains("s2"), "error must reference the disconnector: {error}");

        graph.add_edge("s4", "s2");
        connections.reg_connect(&graph, "i", "n", "s4").expect("ordered reconnect");
    }

    #[test]
    fn live_connection_rejects_second_connector() {
        let graph = DepGraph::new();
        let mut connections = ConnectionRegistry::new("disk attachment");
        connections.reg_connect(&graph, "d", "i", "s1").unwrap();
        let error = connections.reg_connect(&graph, "d", "i", "s2").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ResourceAlreadyExists);
    }

    #[test]
    fn disconnect_all_closes_every_live_connection() {
        let mut graph = DepGraph::new();
        graph.add_edge("kill", "a1");
        graph.add_edge("kill", "a2");
        let mut connections = ConnectionRegistry::new("disk attachment");
        connections.reg_connect(&graph, "d1", "i", "a1").unwrap();
        connections.reg_connect(&graph, "d2", "i", "a2").unwrap();

        connections.reg_disconnect_all(&graph, "i", "kill").unwrap();
        assert!(!connections.live("d1", "i"));
        assert!(!connections.live("d2", "i"));
    }

    #[tokio::test]
    async fn cleanup_deletes_each_resource_exactly_once() {
        use gantry_compute::TestComputeService;

        let registries = Registries::new();
        registries.create(ResourceKind::Disk, resource("d", "s1"), false).unwrap();
        let mut exempt = resource("keep", "s1");
        exempt.real_name = "keep-abcde".into();
        exempt.no_cleanup = true;
        registries.create(ResourceKind::Disk, exempt, false).unwrap();

        let api = TestComputeService::new();
        let failures = registries.cleanup(&api).await;
        assert!(failures.is_empty());
        assert_eq!(api.targets("disks.delete"), vec!["d-abcde"]);

        // A second sweep must not re-delete.
        let failures = registries.cleanup(&api).await;
        assert!(failures.is_empty());
        assert_eq!(api.method_count("disks.delete"), 1);
    }

    #[tokio::test]
    async fn cleanup_failures_are_reported_not_raised() {
        use gantry_compute::{ComputeError, TestComputeService};

        let registries = Registries::new();
        registries.create(ResourceKind::Disk, resource("d", "s1"), false).unwrap();

        let api = TestComputeService::new();
        api.fail_next("disks.delete", ComputeError::http(400, None, "still attached"));
        let failures = registries.cleanup(&api).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind(), ErrorKind::CleanupFailed);
    }
}
