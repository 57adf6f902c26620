//! Source retrieval.
//!
//! The byte-level transport is an external collaborator behind the
//! `FetchAdapter` trait. Two adapters ship with the crate: an in-memory one
//! for tests and embedding, and a directory-backed offline loader.

pub mod adapters;

pub use adapters::*;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Raw bytes of a source plus the transport's content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    /// Fingerprint supplied by the transport (ETag, digest header...).
    pub fingerprint: Option<String>,
}

impl FetchedDocument {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            fingerprint: None,
        }
    }

    /// Fingerprint to cache against: the transport's, or a content digest.
    pub fn effective_fingerprint(&self) -> String {
        self.fingerprint
            .clone()
            .unwrap_or_else(|| compute_fingerprint(&self.bytes))
    }
}

/// Retrieves raw bytes for a source url.
#[async_trait]
pub trait FetchAdapter: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedDocument>;
}

/// SHA-256 hex digest of `bytes`.
pub fn compute_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
