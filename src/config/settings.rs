//! Engine configuration loaded from JSON.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::source::{SourceConfig, SourceDescriptor, SourceKind};
use crate::error::{TlError, TlResult};
use crate::trust::SynchronizationStrategy;

/// Ceilings enforced on every downloaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub max_document_bytes: usize,
    pub max_providers: usize,
    /// Services across all providers of one document.
    pub max_services: usize,
    pub max_pointers: usize,
    pub max_pivots: usize,
    pub max_certificates_per_entry: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_document_bytes: 10 * 1024 * 1024,
            max_providers: 1_000,
            max_services: 10_000,
            max_pointers: 500,
            max_pivots: 64,
            max_certificates_per_entry: 100,
        }
    }
}

fn default_source_timeout_secs() -> u64 {
    30
}

fn default_accepted_versions() -> Vec<u32> {
    vec![5, 6]
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Per-source fetch timeout (default: 30)
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,

    /// Deadline for a whole cycle; unset means no deadline
    #[serde(default)]
    pub cycle_deadline_secs: Option<u64>,

    #[serde(default)]
    pub limits: ResourceLimits,

    #[serde(default)]
    pub synchronization: SynchronizationStrategy,

    /// TL versions the structure verifier knows; empty disables the check
    #[serde(default = "default_accepted_versions")]
    pub accepted_versions: Vec<u32>,

    /// Dump the job summary as JSON around each publication
    #[serde(default)]
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sources: vec![],
            source_timeout_secs: default_source_timeout_secs(),
            cycle_deadline_secs: None,
            limits: ResourceLimits::default(),
            synchronization: SynchronizationStrategy::default(),
            accepted_versions: default_accepted_versions(),
            debug: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> TlResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> TlResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn cycle_deadline(&self) -> Option<Duration> {
        self.cycle_deadline_secs.map(Duration::from_secs)
    }

    /// Check the source graph without compiling anything.
    pub fn validate(&self) -> TlResult<()> {
        let mut seen = HashSet::new();
        let mut duplicates: Vec<&str> = Vec::new();
        for source in &self.sources {
            if !seen.insert(source.url.as_str()) && !duplicates.contains(&source.url.as_str()) {
                duplicates.push(&source.url);
            }
        }
        if !duplicates.is_empty() {
            return Err(TlError::DuplicateUrl(duplicates.join(", ")));
        }

        let kinds: HashMap<&str, SourceKind> = self
            .sources
            .iter()
            .map(|s| (s.url.as_str(), s.kind))
            .collect();

        for source in &self.sources {
            if let Some(parent) = &source.parent {
                if source.kind != SourceKind::Tl {
                    return Err(TlError::Config(format!(
                        "source {}: only trusted lists may declare a parent",
                        source.url
                    )));
                }
                if kinds.get(parent.as_str()) != Some(&SourceKind::Lotl) {
                    return Err(TlError::Config(format!(
                        "source {}: parent {} is not a configured LOTL",
                        source.url, parent
                    )));
                }
            }
            if source.kind == SourceKind::Lotl && source.signing_certificates.is_empty() {
                return Err(TlError::Config(format!(
                    "source {}: a LOTL needs at least one root signing certificate",
                    source.url
                )));
            }
        }

        if self.source_timeout_secs == 0 {
            return Err(TlError::Config(
                "source_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate and resolve every configured source.
    pub fn descriptors(&self) -> TlResult<Vec<SourceDescriptor>> {
        self.validate()?;
        self.sources.iter().map(SourceDescriptor::from_config).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::certificate::test_support::generate_certificate;

    fn config_json(root: &str) -> String {
        format!(
            r#"{{
                "sources": [
                    {{"url": "https://example.org/lotl.json", "kind": "lotl",
                      "pivot_support": true, "signing_certificates": ["{root}"]}},
                    {{"url": "https://example.org/other.json", "kind": "tl"}}
                ],
                "cycle_deadline_secs": 120
            }}"#
        )
    }

    #[test]
    fn test_defaults_applied() {
        let root = generate_certificate("Root");
        let config = EngineConfig::from_json_str(&config_json(&root.to_base64())).unwrap();

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.source_timeout_secs, 30);
        assert_eq!(config.cycle_deadline(), Some(Duration::from_secs(120)));
        assert_eq!(config.accepted_versions, vec![5, 6]);
        assert_eq!(config.limits.max_document_bytes, 10 * 1024 * 1024);
        assert!(config.synchronization.include_expired);
        assert!(!config.debug);

        let descriptors = config.descriptors().unwrap();
        assert_eq!(descriptors.len(), 2);
        assert!(descriptors[0].pivot_support);
    }

    #[test]
    fn test_duplicate_urls_rejected() {
        let json = r#"{"sources": [
            {"url": "https://example.org/tl.json", "kind": "tl"},
            {"url": "https://example.org/tl.json", "kind": "tl"}
        ]}"#;
        let err = EngineConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, TlError::DuplicateUrl(ref urls) if urls == "https://example.org/tl.json"));
    }

    #[test]
    fn test_parent_must_be_lotl() {
        let json = r#"{"sources": [
            {"url": "https://example.org/a.json", "kind": "tl"},
            {"url": "https://example.org/b.json", "kind": "tl", "parent": "https://example.org/a.json"}
        ]}"#;
        assert!(matches!(
            EngineConfig::from_json_str(json),
            Err(TlError::Config(_))
        ));
    }

    #[test]
    fn test_lotl_requires_roots() {
        let json = r#"{"sources": [{"url": "https://example.org/lotl.json", "kind": "lotl"}]}"#;
        let err = EngineConfig::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("root signing certificate"));
    }

    #[test]
    fn test_from_file() {
        let root = generate_certificate("Root");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, config_json(&root.to_base64())).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.sources[0].kind, SourceKind::Lotl);
        assert!(EngineConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
