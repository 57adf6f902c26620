//! Source nodes: a descriptor, its three stage records and kind-specific data.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::CacheRecord;
use crate::config::{SourceDescriptor, SourceId, SourceKind};
use crate::model::{EntityKey, ParsingResult};
use crate::pivot::PivotCertificateEntry;
use crate::validation::{SignatureCheck, SignatureVerdict};

/// Output of the download stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub bytes: Vec<u8>,
    pub fingerprint: String,
}

/// Output of the validation stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub check: SignatureCheck,
    /// Digest of the candidate set the verdict was computed with.
    pub candidates_digest: String,
    pub candidate_count: usize,
    /// The pivot chain was broken before this source; the verifier was not called.
    pub chain_broken: bool,
}

impl ValidationOutcome {
    pub fn verdict(&self) -> SignatureVerdict {
        self.check.verdict
    }

    pub fn is_valid(&self) -> bool {
        self.check.is_valid()
    }
}

/// Kind-specific part of a node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Tl,
    Lotl {
        /// TLs derived from this LOTL's TL pointers.
        children: Vec<SourceId>,
        /// Pivot urls, most recent first.
        pivots: Vec<SourceId>,
        /// Last parsing result whose signature verdict was VALID.
        last_valid: Option<Arc<ParsingResult>>,
    },
    Pivot {
        /// Position in the chain, 0 being the oldest pivot.
        chain_position: usize,
        certificate_status: BTreeMap<EntityKey, PivotCertificateEntry>,
    },
}

#[derive(Debug, Clone)]
pub struct SourceNode {
    pub descriptor: SourceDescriptor,
    pub download: CacheRecord<DownloadResult>,
    pub parsing: CacheRecord<ParsingResult>,
    pub validation: CacheRecord<ValidationOutcome>,
    pub kind: NodeKind,
}

impl SourceNode {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        let kind = match descriptor.kind {
            SourceKind::Lotl => NodeKind::Lotl {
                children: Vec::new(),
                pivots: Vec::new(),
                last_valid: None,
            },
            SourceKind::Tl => NodeKind::Tl,
            SourceKind::Pivot => NodeKind::Pivot {
                chain_position: 0,
                certificate_status: BTreeMap::new(),
            },
        };
        Self {
            descriptor,
            download: CacheRecord::new(),
            parsing: CacheRecord::new(),
            validation: CacheRecord::new(),
            kind,
        }
    }

    pub fn id(&self) -> &SourceId {
        &self.descriptor.id
    }

    pub fn is_to_be_deleted(&self) -> bool {
        self.download.is_to_be_deleted()
    }

    pub fn mark_to_be_deleted(&mut self, flag: bool) {
        self.download.mark_to_be_deleted(flag);
        self.parsing.mark_to_be_deleted(flag);
        self.validation.mark_to_be_deleted(flag);
    }

    /// Replace the descriptor; a changed configuration invalidates the
    /// parsing and validation results.
    pub fn update_descriptor(&mut self, descriptor: SourceDescriptor, now: DateTime<Utc>) {
        if descriptor.revision != self.descriptor.revision {
            self.parsing.refresh_needed(now);
            self.validation.refresh_needed(now);
        }
        self.descriptor = descriptor;
    }

    /// Latest parsing result, if any.
    pub fn parsing_result(&self) -> Option<&Arc<ParsingResult>> {
        self.parsing.result()
    }

    /// Verdict of the current validation, when validation is synchronized.
    pub fn current_verdict(&self) -> Option<SignatureVerdict> {
        if self.validation.is_synchronized() {
            self.validation.result().map(|v| v.verdict())
        } else {
            None
        }
    }

    /// Synchronized and VALID: the only state whose content is propagated.
    pub fn is_trusted(&self) -> bool {
        self.current_verdict() == Some(SignatureVerdict::Valid)
    }

    pub fn children(&self) -> &[SourceId] {
        match &self.kind {
            NodeKind::Lotl { children, .. } => children,
            _ => &[],
        }
    }

    pub fn pivots(&self) -> &[SourceId] {
        match &self.kind {
            NodeKind::Lotl { pivots, .. } => pivots,
            _ => &[],
        }
    }

    pub fn last_valid_parsing(&self) -> Option<&Arc<ParsingResult>> {
        match &self.kind {
            NodeKind::Lotl { last_valid, .. } => last_valid.as_ref(),
            _ => None,
        }
    }

    pub fn pivot_certificate_status(&self) -> Option<&BTreeMap<EntityKey, PivotCertificateEntry>> {
        match &self.kind {
            NodeKind::Pivot {
                certificate_status, ..
            } => Some(certificate_status),
            _ => None,
        }
    }
}
