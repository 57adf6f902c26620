//! Read-only view of the cache after a cycle.
//!
//! Built once every node has settled and published together with the trust
//! map. Nothing in here points back into the live cache.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CacheRecord, CacheStatus, NodeKind, SourceNode, ValidationOutcome};
use crate::config::{SourceId, SourceKind};
use crate::error::CapturedError;
use crate::model::{CertificateToken, EntityKey, ParsingResult};
use crate::pivot::PivotCertificateEntry;
use crate::validation::SignatureVerdict;

/// State of one stage record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheRecordInfo {
    pub status: CacheStatus,
    pub to_be_deleted: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_state_transition: Option<DateTime<Utc>>,
    pub error: Option<CapturedError>,
    pub fingerprint: Option<String>,
}

impl<T> From<&CacheRecord<T>> for CacheRecordInfo {
    fn from(record: &CacheRecord<T>) -> Self {
        Self {
            status: record.status(),
            to_be_deleted: record.is_to_be_deleted(),
            last_success: record.last_success(),
            last_attempt: record.last_attempt(),
            last_state_transition: record.last_state_transition(),
            error: record.error().cloned(),
            fingerprint: record.fingerprint().map(str::to_string),
        }
    }
}

/// Snapshot of one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub id: SourceId,
    pub url: String,
    pub kind: SourceKind,
    pub parent: Option<SourceId>,
    pub configured: bool,
    pub download: CacheRecordInfo,
    pub parsing: CacheRecordInfo,
    pub validation: CacheRecordInfo,
    pub parsing_result: Option<Arc<ParsingResult>>,
    pub validation_outcome: Option<Arc<ValidationOutcome>>,
}

impl SourceInfo {
    pub fn from_node(node: &SourceNode) -> Self {
        Self {
            id: node.id().clone(),
            url: node.descriptor.url.clone(),
            kind: node.descriptor.kind,
            parent: node.descriptor.parent.clone(),
            configured: node.descriptor.configured,
            download: CacheRecordInfo::from(&node.download),
            parsing: CacheRecordInfo::from(&node.parsing),
            validation: CacheRecordInfo::from(&node.validation),
            parsing_result: node.parsing_result().cloned(),
            validation_outcome: node.validation.result().cloned(),
        }
    }

    /// Verdict of the current validation, if validation is synchronized.
    pub fn verdict(&self) -> Option<SignatureVerdict> {
        if self.validation.status == CacheStatus::Synchronized {
            self.validation_outcome.as_ref().map(|v| v.verdict())
        } else {
            None
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.verdict() == Some(SignatureVerdict::Valid)
    }

    pub fn structure_violations(&self) -> &[String] {
        self.parsing_result
            .as_ref()
            .map(|r| r.structure_violations.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.parsing_result
            .as_ref()
            .map_or(false, |r| r.is_expired(now))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PivotSummary {
    pub info: SourceInfo,
    /// 0 is the oldest pivot.
    pub chain_position: usize,
    pub certificate_status: BTreeMap<EntityKey, PivotCertificateEntry>,
}

impl PivotSummary {
    /// Keys announced as LOTL signers by this pivot.
    pub fn announced_keys(&self) -> HashSet<&EntityKey> {
        self.certificate_status
            .iter()
            .filter(|(_, entry)| entry.status.is_trusted_after())
            .map(|(key, _)| key)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LotlSummary {
    pub info: SourceInfo,
    pub configured_roots: Vec<CertificateToken>,
    pub expected_announcement_url: Option<String>,
    pub expected_lotl_location: Option<String>,
    pub children: Vec<SourceInfo>,
    /// Oldest first.
    pub pivots: Vec<PivotSummary>,
}

impl LotlSummary {
    /// Whether `key` belonged to the LOTL signer set in force at `date`.
    ///
    /// The configured roots are in force until the first pivot is issued;
    /// every valid pivot then replaces the set with the one it announces,
    /// and the live LOTL does the same once it is itself valid. A broken
    /// chain stops the walk at the break.
    pub fn was_trusted_signer(&self, key: &EntityKey, date: DateTime<Utc>) -> bool {
        let mut in_force: HashSet<&EntityKey> =
            self.configured_roots.iter().map(|c| c.entity_key()).collect();

        for pivot in &self.pivots {
            if !pivot.info.is_trusted() {
                break;
            }
            let issued = match pivot.info.parsing_result.as_ref().and_then(|r| r.issue_date) {
                Some(issued) => issued,
                None => continue,
            };
            if issued > date {
                return in_force.contains(key);
            }
            in_force = pivot.announced_keys();
        }

        if self.info.is_trusted() {
            if let Some(result) = &self.info.parsing_result {
                if result.issue_date.map_or(false, |issued| issued <= date) {
                    return result
                        .lotl_pointers()
                        .iter()
                        .flat_map(|p| p.certificates.iter())
                        .any(|c| c.entity_key() == key);
                }
            }
        }
        in_force.contains(key)
    }

    pub fn broken_pivot(&self) -> Option<&PivotSummary> {
        self.pivots.iter().find(|p| {
            p.info
                .validation_outcome
                .as_ref()
                .map_or(false, |v| !v.is_valid() && !v.chain_broken)
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub cycle_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub lotls: Vec<LotlSummary>,
    /// TLs not announced by any LOTL.
    pub other_tls: Vec<SourceInfo>,
}

impl Default for JobSummary {
    fn default() -> Self {
        Self {
            cycle_id: None,
            generated_at: Utc::now(),
            lotls: Vec::new(),
            other_tls: Vec::new(),
        }
    }
}

impl JobSummary {
    /// Build from nodes sorted by identifier, as returned by the store.
    pub fn build(nodes: &[SourceNode], cycle_id: &str, now: DateTime<Utc>) -> Self {
        let by_id: BTreeMap<&SourceId, &SourceNode> = nodes.iter().map(|n| (n.id(), n)).collect();
        let mut claimed: HashSet<&SourceId> = HashSet::new();
        let mut lotls = Vec::new();

        for node in nodes.iter().filter(|n| n.descriptor.is_lotl()) {
            claimed.insert(node.id());

            // configured children announce the LOTL as parent without being listed
            let mut child_ids: Vec<&SourceId> = node.children().iter().collect();
            for other in nodes {
                if other.descriptor.configured
                    && other.descriptor.parent.as_ref() == Some(node.id())
                    && !child_ids.contains(&other.id())
                {
                    child_ids.push(other.id());
                }
            }
            let children: Vec<SourceInfo> = child_ids
                .into_iter()
                .filter_map(|id| by_id.get(id))
                .filter(|child| child.descriptor.kind == SourceKind::Tl)
                .map(|child| {
                    claimed.insert(child.id());
                    SourceInfo::from_node(child)
                })
                .collect();

            let mut pivots: Vec<PivotSummary> = node
                .pivots()
                .iter()
                .filter_map(|id| by_id.get(id))
                .filter_map(|pivot| {
                    claimed.insert(pivot.id());
                    match &pivot.kind {
                        NodeKind::Pivot {
                            chain_position,
                            certificate_status,
                        } => Some(PivotSummary {
                            info: SourceInfo::from_node(pivot),
                            chain_position: *chain_position,
                            certificate_status: certificate_status.clone(),
                        }),
                        _ => None,
                    }
                })
                .collect();
            pivots.sort_by_key(|p| p.chain_position);

            lotls.push(LotlSummary {
                info: SourceInfo::from_node(node),
                configured_roots: node.descriptor.signing_certificates.clone(),
                expected_announcement_url: node.descriptor.expected_announcement_url.clone(),
                expected_lotl_location: node.descriptor.expected_lotl_location.clone(),
                children,
                pivots,
            });
        }

        let other_tls = nodes
            .iter()
            .filter(|n| n.descriptor.kind == SourceKind::Tl && !claimed.contains(n.id()))
            .map(SourceInfo::from_node)
            .collect();

        Self {
            cycle_id: Some(cycle_id.to_string()),
            generated_at: now,
            lotls,
            other_tls,
        }
    }

    /// Every source in the summary: LOTLs, their pivots and children, then other TLs.
    pub fn sources(&self) -> impl Iterator<Item = &SourceInfo> {
        self.lotls
            .iter()
            .flat_map(|lotl| {
                std::iter::once(&lotl.info)
                    .chain(lotl.pivots.iter().map(|p| &p.info))
                    .chain(lotl.children.iter())
            })
            .chain(self.other_tls.iter())
    }

    pub fn source(&self, id: &str) -> Option<&SourceInfo> {
        self.sources().find(|s| s.id.as_str() == id)
    }

    pub fn lotl(&self, id: &str) -> Option<&LotlSummary> {
        self.lotls.iter().find(|l| l.info.id.as_str() == id)
    }

    /// Number of trusted lists, announced or standalone.
    pub fn number_of_tls(&self) -> usize {
        self.lotls.iter().map(|l| l.children.len()).sum::<usize>() + self.other_tls.len()
    }

    pub fn number_of_lotls(&self) -> usize {
        self.lotls.len()
    }

    pub fn number_of_pivots(&self) -> usize {
        self.lotls.iter().map(|l| l.pivots.len()).sum()
    }

    /// Sources whose validation is synchronized and VALID.
    pub fn trusted_count(&self) -> usize {
        self.sources().filter(|s| s.is_trusted()).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
