//! Compute API error classification.

use thiserror::Error;

/// Failure modes of a compute API call, shaped so the retry policy can
/// classify transience without string matching at call sites.
#[derive(Debug, Clone, Error)]
pub enum ComputeError {
    /// Socket/transport-level failure before an HTTP status was produced.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// HTTP-level failure. `reason` carries the API's machine-readable
    /// reason code when the error body included one.
    #[error("API returned HTTP {status}: {message}")]
    Http {
        status: u16,
        reason: Option<String>,
        message: String,
    },

    /// Credential acquisition or refresh failed.
    #[error("auth error: {message}")]
    Auth { message: String },

    /// An operation reached `DONE` carrying errors.
    #[error("operation failed:\n{diagnostic}")]
    OperationFailed { diagnostic: String },

    /// An operation reported a status outside PENDING/RUNNING/DONE.
    #[error("unknown operation status {status:?}")]
    UnknownOperationStatus { status: String },

    /// The response body could not be decoded.
    #[error("bad API response: {message}")]
    Response { message: String },
}

impl ComputeError {
    pub fn transport(message: impl Into<String>) -> Self {
        ComputeError::Transport { message: message.into() }
    }

    pub fn http(status: u16, reason: Option<String>, message: impl Into<String>) -> Self {
        ComputeError::Http {
            status,
            reason,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        ComputeError::Auth { message: message.into() }
    }

    pub fn response(message: impl Into<String>) -> Self {
        ComputeError::Response { message: message.into() }
    }
}
