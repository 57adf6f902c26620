//! Published trust map.
//!
//! Keyed by certificate entity key. A certificate listed by several
//! services or several TLs keeps one `TrustProperties` per occurrence;
//! choosing between them is up to the consumer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{
    CertificateToken, EntityKey, ServiceStatusEntry, TrustService, TrustServiceProvider,
};

/// What one trusted list asserts about one certificate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustProperties {
    pub certificate: CertificateToken,
    /// Url of the TL the certificate was found in.
    pub tl_url: String,
    /// Url of the LOTL that announced the TL, if any.
    pub lotl_url: Option<String>,
    pub provider: Arc<TrustServiceProvider>,
    pub service: Arc<TrustService>,
}

impl TrustProperties {
    /// Service status in force at `date`.
    pub fn status_at(&self, date: DateTime<Utc>) -> Option<&ServiceStatusEntry> {
        self.service.status_at(date)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrustMap {
    entries: HashMap<EntityKey, Vec<TrustProperties>>,
}

impl TrustMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, properties: TrustProperties) {
        self.entries
            .entry(properties.certificate.entity_key().clone())
            .or_default()
            .push(properties);
    }

    pub fn get(&self, key: &EntityKey) -> &[TrustProperties] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn for_certificate(&self, certificate: &CertificateToken) -> &[TrustProperties] {
        self.get(certificate.entity_key())
    }

    /// Number of distinct certificates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of `TrustProperties` across all certificates.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &[TrustProperties])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Everything contributed by the TL at `tl_url`.
    pub fn contributions_of<'a>(&'a self, tl_url: &'a str) -> impl Iterator<Item = &'a TrustProperties> + 'a {
        self.entries
            .values()
            .flatten()
            .filter(move |p| p.tl_url == tl_url)
    }
}
