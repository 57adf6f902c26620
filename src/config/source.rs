//! Source descriptors.
//!
//! A descriptor is the engine-side view of one trusted list source: either
//! taken from configuration or derived at runtime from a pointer in a LOTL.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::filters::{FilterSpec, SourceFilters};
use crate::error::{TlError, TlResult};
use crate::model::CertificateToken;

/// Identifier of a source. The URL is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(url: &str) -> Self {
        Self(url.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Lotl,
    Tl,
    Pivot,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Lotl => "lotl",
            SourceKind::Tl => "tl",
            SourceKind::Pivot => "pivot",
        }
    }
}

/// Source entry as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    pub kind: SourceKind,
    /// Url of the configured LOTL this TL is announced by.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub pivot_support: bool,
    /// Base64 DER root signing certificates.
    #[serde(default)]
    pub signing_certificates: Vec<String>,
    #[serde(default)]
    pub filters: FilterSpec,
    #[serde(default)]
    pub expected_announcement_url: Option<String>,
    #[serde(default)]
    pub expected_lotl_location: Option<String>,
}

/// Resolved description of a source.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub id: SourceId,
    pub url: String,
    pub kind: SourceKind,
    /// Parent LOTL for TLs and pivots.
    pub parent: Option<SourceId>,
    /// True when the source comes from configuration rather than a pointer.
    pub configured: bool,
    pub pivot_support: bool,
    pub signing_certificates: Vec<CertificateToken>,
    pub filters: SourceFilters,
    pub expected_announcement_url: Option<String>,
    pub expected_lotl_location: Option<String>,
    /// Digest of the declarative configuration this descriptor came from.
    pub revision: String,
}

fn revision_of(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

impl SourceDescriptor {
    pub fn from_config(config: &SourceConfig) -> TlResult<Self> {
        let signing_certificates = config
            .signing_certificates
            .iter()
            .map(|encoded| CertificateToken::from_base64(encoded))
            .collect::<TlResult<Vec<_>>>()
            .map_err(|e| TlError::Config(format!("source {}: {}", config.url, e)))?;

        if config.kind == SourceKind::Pivot {
            return Err(TlError::Config(format!(
                "source {}: pivots are discovered from their LOTL and cannot be configured",
                config.url
            )));
        }

        Ok(Self {
            id: SourceId::new(&config.url),
            url: config.url.clone(),
            kind: config.kind,
            parent: config.parent.as_deref().map(SourceId::new),
            configured: true,
            pivot_support: config.pivot_support,
            signing_certificates,
            filters: config.filters.compile()?,
            expected_announcement_url: config.expected_announcement_url.clone(),
            expected_lotl_location: config.expected_lotl_location.clone(),
            revision: revision_of(&[&serde_json::to_vec(config)?]),
        })
    }

    /// Descriptor for a TL discovered through a LOTL pointer.
    ///
    /// Provider and service predicates are inherited from the LOTL.
    pub fn derived_tl(url: &str, parent: &SourceDescriptor) -> Self {
        Self {
            id: SourceId::new(url),
            url: url.to_string(),
            kind: SourceKind::Tl,
            parent: Some(parent.id.clone()),
            configured: false,
            pivot_support: false,
            signing_certificates: Vec::new(),
            filters: parent.filters.clone(),
            expected_announcement_url: None,
            expected_lotl_location: None,
            revision: revision_of(&[b"tl", url.as_bytes(), parent.revision.as_bytes()]),
        }
    }

    /// Descriptor for a pivot LOTL found in a LOTL's scheme information.
    pub fn pivot(url: &str, parent: &SourceDescriptor) -> Self {
        Self {
            id: SourceId::new(url),
            url: url.to_string(),
            kind: SourceKind::Pivot,
            parent: Some(parent.id.clone()),
            configured: false,
            pivot_support: false,
            signing_certificates: Vec::new(),
            filters: parent.filters.clone(),
            expected_announcement_url: None,
            expected_lotl_location: None,
            revision: revision_of(&[b"pivot", url.as_bytes(), parent.revision.as_bytes()]),
        }
    }

    pub fn is_lotl(&self) -> bool {
        self.kind == SourceKind::Lotl
    }
}
