//! Normalized JSON rendition of a trusted list.
//!
//! This is what an upstream XML-to-JSON step emits. Only the fields the
//! engine reads are modelled; unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::model::Multilingual;

#[derive(Debug, Clone, Deserialize)]
pub struct RawDocument {
    pub scheme: RawScheme,
    #[serde(default)]
    pub providers: Vec<RawProvider>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawScheme {
    #[serde(default)]
    pub tsl_type: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub sequence_number: Option<u64>,
    #[serde(default)]
    pub territory: Option<String>,
    #[serde(default)]
    pub issue_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub distribution_points: Vec<String>,
    /// Pivot urls (most recent first) and the Official Journal reference.
    #[serde(default)]
    pub scheme_information_uris: Vec<String>,
    #[serde(default)]
    pub pointers: Vec<RawPointer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPointer {
    pub location: String,
    #[serde(default)]
    pub territory: Option<String>,
    #[serde(default)]
    pub tsl_type: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Base64 DER certificates.
    #[serde(default)]
    pub certificates: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProvider {
    #[serde(default)]
    pub names: Multilingual,
    #[serde(default)]
    pub trade_names: Multilingual,
    #[serde(default)]
    pub registration_identifiers: Vec<String>,
    #[serde(default)]
    pub territory: Option<String>,
    #[serde(default)]
    pub electronic_addresses: Multilingual,
    #[serde(default)]
    pub services: Vec<RawService>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawService {
    #[serde(default)]
    pub certificates: Vec<String>,
    #[serde(default)]
    pub history: Vec<RawHistoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHistoryEntry {
    pub start: DateTime<Utc>,
    pub status: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub names: Multilingual,
    #[serde(default)]
    pub qualifiers: Vec<RawQualifier>,
    #[serde(default)]
    pub additional_info: Vec<String>,
    #[serde(default)]
    pub supply_points: Vec<String>,
    #[serde(default)]
    pub expired_certs_revocation_info: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawQualifier {
    #[serde(default)]
    pub qualifiers: Vec<String>,
    #[serde(default)]
    pub criteria: Value,
}
