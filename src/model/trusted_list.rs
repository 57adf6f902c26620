//! Parsed trusted list content.
//!
//! These are immutable value objects: a new `ParsingResult` replaces the
//! previous one whenever a source is re-parsed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::certificate::CertificateToken;
use super::timeline::TimeDependentValues;

/// Well-known ETSI TS 119 612 URIs.
pub mod uri {
    pub const TSL_TYPE_EU_LOTL: &str =
        "http://uri.etsi.org/TrstSvc/TrustedList/TSLType/EUlistofthelists";
    pub const TSL_TYPE_EU_GENERIC: &str =
        "http://uri.etsi.org/TrstSvc/TrustedList/TSLType/EUgeneric";

    pub const STATUS_GRANTED: &str = "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/granted";
    pub const STATUS_WITHDRAWN: &str =
        "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/withdrawn";
    pub const STATUS_RECOGNISED_AT_NATIONAL_LEVEL: &str =
        "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/recognisedatnationallevel";
    pub const STATUS_DEPRECATED_AT_NATIONAL_LEVEL: &str =
        "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/deprecatedatnationallevel";
    pub const STATUS_UNDER_SUPERVISION: &str = "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/undersupervision";
    pub const STATUS_SUPERVISION_IN_CESSATION: &str =
        "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/supervisionincessation";
    pub const STATUS_ACCREDITED: &str = "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/accredited";

    pub const SERVICE_TYPE_CA_QC: &str = "http://uri.etsi.org/TrstSvc/Svctype/CA/QC";
    pub const SERVICE_TYPE_TSA_QTST: &str = "http://uri.etsi.org/TrstSvc/Svctype/TSA/QTST";

    /// Statuses treated as "trusted" across the pre- and post-eIDAS vocabularies.
    pub const GRANTED_EQUIVALENTS: [&str; 5] = [
        STATUS_GRANTED,
        STATUS_RECOGNISED_AT_NATIONAL_LEVEL,
        STATUS_UNDER_SUPERVISION,
        STATUS_SUPERVISION_IN_CESSATION,
        STATUS_ACCREDITED,
    ];
}

/// Multilingual values keyed by language code.
pub type Multilingual = BTreeMap<String, Vec<String>>;

/// Qualifiers applied to certificates matching some criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionForQualifiers {
    pub qualifiers: Vec<String>,
    /// Criteria as published; evaluated by the qualification policy, not here.
    pub criteria: serde_json::Value,
}

/// State of a trust service during one interval of its history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatusEntry {
    pub names: Multilingual,
    pub service_type: String,
    pub status: String,
    pub conditions_for_qualifiers: Vec<ConditionForQualifiers>,
    pub additional_service_info_uris: Vec<String>,
    pub service_supply_points: Vec<String>,
    pub expired_certs_revocation_info: Option<DateTime<Utc>>,
}

impl ServiceStatusEntry {
    pub fn is_granted(&self) -> bool {
        uri::GRANTED_EQUIVALENTS.contains(&self.status.as_str())
    }
}

/// A supervised trust service and its status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustService {
    pub certificates: Vec<CertificateToken>,
    pub history: TimeDependentValues<ServiceStatusEntry>,
}

impl TrustService {
    /// Status entry in force at `date`.
    pub fn status_at(&self, date: DateTime<Utc>) -> Option<&ServiceStatusEntry> {
        self.history.at(date)
    }

    pub fn current_status(&self) -> Option<&ServiceStatusEntry> {
        self.history.latest().map(|entry| &entry.value)
    }
}

/// A trust service provider and its (filtered) services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustServiceProvider {
    pub names: Multilingual,
    pub trade_names: Multilingual,
    pub registration_identifiers: Vec<String>,
    pub territory: Option<String>,
    pub electronic_addresses: Multilingual,
    pub services: Vec<Arc<TrustService>>,
}

/// Pointer from a list of trusted lists to another list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherTslPointer {
    pub location: String,
    pub territory: Option<String>,
    pub tsl_type: Option<String>,
    pub mime_type: Option<String>,
    /// Certificates announced as the signers of the pointed list.
    pub certificates: Vec<CertificateToken>,
}

/// Kind-specific part of a parsing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListContent {
    TrustedList {
        providers: Vec<Arc<TrustServiceProvider>>,
    },
    ListOfLists {
        lotl_pointers: Vec<OtherTslPointer>,
        tl_pointers: Vec<OtherTslPointer>,
        pivot_urls: Vec<String>,
        signing_certificate_announcement_url: Option<String>,
    },
}

/// Outcome of the parsing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsingResult {
    pub tsl_type: Option<String>,
    pub sequence_number: Option<u64>,
    pub version: Option<u32>,
    pub territory: Option<String>,
    pub issue_date: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
    pub distribution_points: Vec<String>,
    pub content: ListContent,
    /// Advisory structural violations; never invalidate trust by themselves.
    pub structure_violations: Vec<String>,
}

impl ParsingResult {
    pub fn providers(&self) -> &[Arc<TrustServiceProvider>] {
        match &self.content {
            ListContent::TrustedList { providers } => providers,
            ListContent::ListOfLists { .. } => &[],
        }
    }

    pub fn tl_pointers(&self) -> &[OtherTslPointer] {
        match &self.content {
            ListContent::ListOfLists { tl_pointers, .. } => tl_pointers,
            ListContent::TrustedList { .. } => &[],
        }
    }

    pub fn lotl_pointers(&self) -> &[OtherTslPointer] {
        match &self.content {
            ListContent::ListOfLists { lotl_pointers, .. } => lotl_pointers,
            ListContent::TrustedList { .. } => &[],
        }
    }

    /// Pivot urls in document order: most recent first.
    pub fn pivot_urls(&self) -> &[String] {
        match &self.content {
            ListContent::ListOfLists { pivot_urls, .. } => pivot_urls,
            ListContent::TrustedList { .. } => &[],
        }
    }

    pub fn signing_certificate_announcement_url(&self) -> Option<&str> {
        match &self.content {
            ListContent::ListOfLists {
                signing_certificate_announcement_url,
                ..
            } => signing_certificate_announcement_url.as_deref(),
            ListContent::TrustedList { .. } => None,
        }
    }

    /// Signing certificates this list announces for the LOTL itself.
    pub fn announced_lotl_signers(&self) -> Vec<CertificateToken> {
        let mut signers: Vec<CertificateToken> = Vec::new();
        for pointer in self.lotl_pointers() {
            for cert in &pointer.certificates {
                if !signers.contains(cert) {
                    signers.push(cert.clone());
                }
            }
        }
        signers
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.next_update.map_or(false, |next| next < now)
    }
}
