//! Error taxonomy for the refresh engine.
//!
//! Stage failures are captured into the owning cache record and never
//! escape the per-source pipeline. Only configuration problems surface
//! from the public engine API.

use serde::{Deserialize, Serialize};

/// Errors raised while refreshing trusted list sources.
#[derive(Debug, thiserror::Error)]
pub enum TlError {
    /// The fetch adapter failed to retrieve the source
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The fetch did not complete within the per-source timeout
    #[error("fetch timed out after {0}s")]
    FetchTimeout(u64),

    /// Oversized or abusive input; the source is rejected for this cycle
    #[error("resource limit exceeded: {what} is {actual}, limit {limit}")]
    ResourceExhausted {
        what: &'static str,
        actual: usize,
        limit: usize,
    },

    /// Malformed trusted list document
    #[error("parse error: {0}")]
    Parse(String),

    /// A certificate could not be decoded
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The signature verification adapter failed to produce a verdict
    #[error("signature verification failed: {0}")]
    Verification(String),

    /// Invalid engine or source configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Two sources share the same URL
    #[error("duplicate urls found: {0}")]
    DuplicateUrl(String),

    /// No source with this identifier is known
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TlResult<T> = Result<T, TlError>;

/// Snapshot of a stage failure kept in the cache record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedError {
    pub message: String,
    pub trace: String,
}

impl CapturedError {
    pub fn new(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: trace.into(),
        }
    }
}

impl From<&TlError> for CapturedError {
    fn from(err: &TlError) -> Self {
        Self::new(err.to_string(), format!("{:?}", err))
    }
}

impl From<&anyhow::Error> for CapturedError {
    fn from(err: &anyhow::Error) -> Self {
        // `{:#}` renders the whole context chain on one line
        Self::new(format!("{:#}", err), format!("{:?}", err))
    }
}
