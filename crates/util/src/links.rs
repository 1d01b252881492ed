//! Resource link parsing and partial-URL extension.
//!
//! Compute resources are addressed by fully-qualified links of the form
//! `projects/P/zones/Z/disks/N` (zonal), `projects/P/regions/R/K/N`
//! (regional) or `projects/P/global/K/N` (global). Workflow documents may
//! use short names or partial links; the engine extends them using the
//! templates defined here. Each template owns the regex that defines the
//! fully-qualified form for its kind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Where a resource kind lives in the API hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkScope {
    Zonal,
    Regional,
    Global,
}

/// Components parsed out of a resource link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLink {
    pub project: Option<String>,
    /// Zone for zonal kinds, region for regional kinds, absent for global.
    pub locus: Option<String>,
    pub name: String,
}

/// Link grammar for one resource kind.
pub struct UrlTemplate {
    collection: &'static str,
    scope: LinkScope,
    rgx: Lazy<Regex>,
}

const PROJECT_PART: &str = r"[a-z][-.:a-z0-9]*[a-z0-9]";
const LABEL_PART: &str = r"[a-z][-a-z0-9]*[a-z0-9]|[a-z]";

impl UrlTemplate {
    const fn new(collection: &'static str, scope: LinkScope, rgx: fn() -> Regex) -> Self {
        Self {
            collection,
            scope,
            rgx: Lazy::new(rgx),
        }
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }

    pub fn scope(&self) -> LinkScope {
        self.scope
    }

    /// Whether `value` already matches this kind's partial or fully-qualified
    /// link form (an optional `projects/P/` prefix followed by the scoped
    /// collection path).
    pub fn matches(&self, value: &str) -> bool {
        self.rgx.is_match(value.trim_start_matches('/'))
    }

    /// Parse a link into its components. Short bare names do not match; use
    /// [`UrlTemplate::extend`] to canonicalize those.
    pub fn parse(&self, value: &str) -> Option<ParsedLink> {
        let captures = self.rgx.captures(value.trim_start_matches('/'))?;
        Some(ParsedLink {
            project: captures.name("project").map(|m| m.as_str().to_string()),
            locus: captures.name("locus").map(|m| m.as_str().to_string()),
            name: captures.name("name").map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
    }

    /// Produce the fully-qualified link for `name` in the given project and
    /// locus (zone or region, ignored for global kinds). Values that already
    /// match the link grammar are re-rooted onto defaults only where their
    /// own components are missing.
    pub fn extend(&self, value: &str, project: &str, locus: &str) -> String {
        if let Some(parsed) = self.parse(value) {
            let project = parsed.project.unwrap_or_else(|| project.to_string());
            let locus = parsed.locus.unwrap_or_else(|| locus.to_string());
            return self.link(&project, &locus, &parsed.name);
        }
        self.link(project, locus, value)
    }

    /// Build the fully-qualified link from explicit components.
    pub fn link(&self, project: &str, locus: &str, name: &str) -> String {
        match self.scope {
            LinkScope::Zonal => format!("projects/{project}/zones/{locus}/{}/{name}", self.collection),
            LinkScope::Regional => format!("projects/{project}/regions/{locus}/{}/{name}", self.collection),
            LinkScope::Global => format!("projects/{project}/global/{}/{name}", self.collection),
        }
    }
}

macro_rules! url_template {
    ($name:ident, $collection:literal, Zonal) => {
        pub static $name: UrlTemplate = UrlTemplate::new($collection, LinkScope::Zonal, || {
            Regex::new(&format!(
                r"^(projects/(?P<project>{PROJECT_PART})/)?zones/(?P<locus>{LABEL_PART})/{}/(?P<name>{LABEL_PART})$",
                $collection
            ))
            .expect("static regex")
        });
    };
    ($name:ident, $collection:literal, Regional) => {
        pub static $name: UrlTemplate = UrlTemplate::new($collection, LinkScope::Regional, || {
            Regex::new(&format!(
                r"^(projects/(?P<project>{PROJECT_PART})/)?regions/(?P<locus>{LABEL_PART})/{}/(?P<name>{LABEL_PART})$",
                $collection
            ))
            .expect("static regex")
        });
    };
    ($name:ident, $collection:literal, Global) => {
        pub static $name: UrlTemplate = UrlTemplate::new($collection, LinkScope::Global, || {
            Regex::new(&format!(
                r"^(projects/(?P<project>{PROJECT_PART})/)?global/{}/(?P<name>{LABEL_PART})$",
                $collection
            ))
            .expect("static regex")
        });
    };
}

/// Link templates for every resource kind the engine touches.
pub mod templates {
    use super::*;

    url_template!(DISK, "disks", Zonal);
    url_template!(DISK_TYPE, "diskTypes", Zonal);
    url_template!(INSTANCE, "instances", Zonal);
    url_template!(MACHINE_TYPE, "machineTypes", Zonal);
    url_template!(TARGET_INSTANCE, "targetInstances", Zonal);
    url_template!(SUBNETWORK, "subnetworks", Regional);
    url_template!(FORWARDING_RULE, "forwardingRules", Regional);
    url_template!(IMAGE, "images", Global);
    url_template!(MACHINE_IMAGE, "machineImages", Global);
    url_template!(NETWORK, "networks", Global);
    url_template!(SNAPSHOT, "snapshots", Global);
}

/// Derive the region from a zone name by dropping the final `-x` suffix.
pub fn region_from_zone(zone: &str) -> Option<&str> {
    let idx = zone.rfind('-')?;
    if idx == 0 || idx + 1 == zone.len() {
        return None;
    }
    Some(&zone[..idx])
}

#[cfg(test)]
mod tests {
    use super::templates::*;
    use super::*;

    #[test]
    fn zonal_link_extends_bare_name() {
        let link = DISK.extend("bootdisk", "proj-1", "us-central1-a");
        assert_eq!(link, "projects/proj-1/zones/us-central1-a/disks/bootdisk");
    }

    #[test]
    fn qualified_link_passes_through() {
        let full = "projects/other/zones/eu-west1-b/disks/d";
        assert_eq!(DISK.extend(full, "proj-1", "us-central1-a"), full);
    }

    #[test]
    fn partial_link_inherits_default_project() {
        let link = INSTANCE.extend("zones/us-central1-a/instances/vm", "proj-1", "ignored");
        assert_eq!(link, "projects/proj-1/zones/us-central1-a/instances/vm");
    }

    #[test]
    fn global_kinds_ignore_locus() {
        let link = IMAGE.extend("debian-11", "proj-1", "us-central1-a");
        assert_eq!(link, "projects/proj-1/global/images/debian-11");
        assert!(IMAGE.matches("projects/debian-cloud/global/images/debian-11"));
    }

    #[test]
    fn regional_parse_extracts_components() {
        let parsed = SUBNETWORK
            .parse("projects/p/regions/us-central1/subnetworks/sn")
            .expect("parse subnetwork link");
        assert_eq!(parsed.project.as_deref(), Some("p"));
        assert_eq!(parsed.locus.as_deref(), Some("us-central1"));
        assert_eq!(parsed.name, "sn");
    }

    #[test]
    fn machine_type_link_shape() {
        let link = MACHINE_TYPE.extend("n1-standard-1", "p", "us-central1-a");
        assert_eq!(link, "projects/p/zones/us-central1-a/machineTypes/n1-standard-1");
    }

    #[test]
    fn region_from_zone_strips_suffix() {
        assert_eq!(region_from_zone("us-central1-a"), Some("us-central1"));
        assert_eq!(region_from_zone("badzone"), None);
    }
}
