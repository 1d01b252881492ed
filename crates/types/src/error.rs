//! Tagged engine errors and multi-error aggregation.
//!
//! Every failure the engine surfaces carries an [`ErrorKind`] tag so callers
//! can branch on what went wrong without string matching, and an optional
//! source for the cause chain. [`ErrorList`] collects the per-step and
//! per-phase failures of a workflow run and folds them into a single primary
//! error with the remainder appended.

use std::fmt;

use thiserror::Error;

/// Category tag attached to every [`FlowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The workflow document or one of its fields is malformed.
    InvalidInput,
    /// A referenced resource is not registered anywhere visible.
    ResourceDoesNotExist,
    /// A resource with the same name already has an active creator.
    ResourceAlreadyExists,
    /// A step uses a resource without depending on the step that provides it.
    MissingDependency,
    /// Two steps claim creation of the same resource without overwrite.
    MultipleCreators,
    /// An image is deprecated/obsolete and may not be used.
    ImageObsolete,
    /// The compute API failed after retries.
    Api,
    /// A step exceeded its deadline.
    Timeout,
    /// The workflow cancel signal fired.
    Cancelled,
    /// Deleting a created resource during cleanup failed.
    CleanupFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::ResourceDoesNotExist => "ResourceDoesNotExist",
            ErrorKind::ResourceAlreadyExists => "ResourceAlreadyExists",
            ErrorKind::MissingDependency => "MissingDependency",
            ErrorKind::MultipleCreators => "MultipleCreators",
            ErrorKind::ImageObsolete => "ImageObsolete",
            ErrorKind::Api => "API",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::CleanupFailed => "CleanupFailed",
        };
        f.write_str(label)
    }
}

/// A single tagged engine error with an optional cause chain.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct FlowError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl FlowError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach a causing error to the chain.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Prefix the message with additional context, keeping kind and source.
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this failure should cancel sibling steps. Everything except
    /// an observed cancellation is fatal to the rest of the DAG.
    pub fn is_fatal(&self) -> bool {
        self.kind != ErrorKind::Cancelled
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::invalid_input(err.to_string()).with_source(err)
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        FlowError::invalid_input(err.to_string()).with_source(err)
    }
}

/// Convenience alias used across the engine crates.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Accumulates errors across independent operations, then folds them into a
/// single result.
///
/// The fold keeps the first observed error as the primary and appends the
/// rest to its message. A `Cancelled` error is suppressed whenever any
/// non-cancelled error is present, since cancellation is a consequence of the
/// real failure rather than a failure of its own.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<FlowError>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, error: FlowError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = FlowError>) {
        self.errors.extend(errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Fold the accumulated errors into a single result.
    pub fn into_result(mut self) -> Result<()> {
        let any_real = self.errors.iter().any(|e| e.kind() != ErrorKind::Cancelled);
        if any_real {
            self.errors.retain(|e| e.kind() != ErrorKind::Cancelled);
        }

        let mut iter = self.errors.into_iter();
        let Some(primary) = iter.next() else {
            return Ok(());
        };

        let rest: Vec<String> = iter.map(|e| e.to_string()).collect();
        if rest.is_empty() {
            return Err(primary);
        }
        let message = format!("{} (and {} more: {})", primary.message, rest.len(), rest.join("; "));
        Err(FlowError {
            kind: primary.kind,
            message,
            source: primary.source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_survives_context_and_source() {
        let io = std::io::Error::other("disk unplugged");
        let err = FlowError::api("create failed").with_source(io).context("step create-disks");
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(err.to_string().contains("step create-disks"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn empty_list_folds_to_ok() {
        assert!(ErrorList::new().into_result().is_ok());
    }

    #[test]
    fn single_error_is_returned_unwrapped() {
        let mut list = ErrorList::new();
        list.add(FlowError::timeout("step hit deadline"));
        let err = list.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.message(), "step hit deadline");
    }

    #[test]
    fn cancelled_is_suppressed_by_real_errors() {
        let mut list = ErrorList::new();
        list.add(FlowError::cancelled("step observed cancel"));
        list.add(FlowError::api("instance insert exploded"));
        let err = list.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(!err.to_string().contains("observed cancel"));
    }

    #[test]
    fn cancelled_alone_is_reported() {
        let mut list = ErrorList::new();
        list.add(FlowError::cancelled("workflow canceled"));
        let err = list.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn multi_error_keeps_first_as_primary() {
        let mut list = ErrorList::new();
        list.add(FlowError::invalid_input("bad cidr"));
        list.add(FlowError::api("quota read failed"));
        let err = list.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("bad cidr"));
        assert!(err.to_string().contains("quota read failed"));
    }
}
