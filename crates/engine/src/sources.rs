//! Source staging contract.
//!
//! Workflow `Sources` entries are staged under the run's
//! `{GCSPath}/{run-id}/sources/` prefix before any step runs; on VMs the
//! `${SOURCESPATH}` autovar resolves to that prefix. The actual object-store
//! client is injected behind [`SourceStager`]; the engine only decides what
//! goes where. [`MemoryStager`] records the handshake for tests.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use gantry_types::{ErrorKind, FlowError, Result};

/// Seam to the object store used for staging sources and copying objects.
#[async_trait]
pub trait SourceStager: Send + Sync {
    /// Upload the local file or directory at `origin` to `destination`, a
    /// `gs://bucket/object` URL.
    async fn upload(&self, origin: &Path, destination: &str) -> Result<()>;

    /// Server-side copy between two `gs://` URLs.
    async fn copy_object(&self, source: &str, destination: &str) -> Result<()>;
}

/// Split a `gs://bucket/prefix` URL into bucket and object prefix.
pub fn parse_gcs_path(path: &str) -> Result<(String, String)> {
    let Some(rest) = path.strip_prefix("gs://") else {
        return Err(FlowError::invalid_input(format!("{path:?} is not a gs:// path")));
    };
    let (bucket, object) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(FlowError::invalid_input(format!("{path:?} is missing a bucket")));
    }
    Ok((bucket.to_string(), object.trim_end_matches('/').to_string()))
}

/// Whether `value` looks like an object-store URL rather than a local path.
pub fn is_gcs_path(value: &str) -> bool {
    value.starts_with("gs://")
}

/// In-memory stager that records every staging action.
#[derive(Debug, Default)]
pub struct MemoryStager {
    actions: Mutex<Vec<StagerAction>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagerAction {
    Upload { origin: String, destination: String },
    Copy { source: String, destination: String },
}

impl MemoryStager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<StagerAction> {
        self.actions.lock().expect("stager actions lock poisoned").clone()
    }

    pub fn uploads_to(&self, destination_prefix: &str) -> usize {
        self.actions
            .lock()
            .expect("stager actions lock poisoned")
            .iter()
            .filter(|action| matches!(action, StagerAction::Upload { destination, .. } if destination.starts_with(destination_prefix)))
            .count()
    }
}

#[async_trait]
impl SourceStager for MemoryStager {
    async fn upload(&self, origin: &Path, destination: &str) -> Result<()> {
        if !origin.exists() {
            return Err(FlowError::new(
                ErrorKind::ResourceDoesNotExist,
                format!("source {} does not exist", origin.display()),
            ));
        }
        self.actions.lock().expect("stager actions lock poisoned").push(StagerAction::Upload {
            origin: origin.display().to_string(),
            destination: destination.to_string(),
        });
        Ok(())
    }

    async fn copy_object(&self, source: &str, destination: &str) -> Result<()> {
        parse_gcs_path(source)?;
        parse_gcs_path(destination)?;
        self.actions.lock().expect("stager actions lock poisoned").push(StagerAction::Copy {
            source: source.to_string(),
            destination: destination.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_prefix() {
        let (bucket, prefix) = parse_gcs_path("gs://wf-bucket/staging/area/").expect("parse");
        assert_eq!(bucket, "wf-bucket");
        assert_eq!(prefix, "staging/area");
    }

    #[test]
    fn parses_bare_bucket() {
        let (bucket, prefix) = parse_gcs_path("gs://wf-bucket").expect("parse");
        assert_eq!(bucket, "wf-bucket");
        assert_eq!(prefix, "");
    }

    #[test]
    fn rejects_non_gcs_paths() {
        assert!(parse_gcs_path("/tmp/stuff").is_err());
        assert!(parse_gcs_path("gs://").is_err());
    }

    #[tokio::test]
    async fn memory_stager_requires_existing_origin() {
        let stager = MemoryStager::new();
        let error = stager
            .upload(Path::new("/definitely/not/here"), "gs://b/sources/x")
            .await
            .expect_err("missing origin");
        assert_eq!(error.kind(), ErrorKind::ResourceDoesNotExist);
    }
}
