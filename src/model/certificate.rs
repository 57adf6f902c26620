//! Certificate tokens and their entity keys.
//!
//! Certificates are compared and indexed by an explicit entity key derived
//! from issuer name and serial number, never by object identity. The same
//! certificate parsed from two documents yields two equal keys.

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::{TlError, TlResult};

/// OID of the Ed25519 public key algorithm.
pub const ED25519_OID: &str = "1.3.101.112";

/// Certificate identity: hex SHA-256 over issuer name and serial number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn from_issuer_serial(issuer: &str, serial_hex: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(issuer.as_bytes());
        hasher.update([0u8]);
        hasher.update(serial_hex.to_ascii_lowercase().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded X.509 certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateToken {
    der: Arc<[u8]>,
    subject: String,
    issuer: String,
    serial: String,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    key_algorithm: String,
    public_key: Vec<u8>,
    entity_key: EntityKey,
}

impl CertificateToken {
    /// Decode a DER encoded certificate.
    pub fn from_der(der: &[u8]) -> TlResult<Self> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| TlError::InvalidCertificate(format!("Failed to parse DER: {}", e)))?;

        let issuer = cert.issuer().to_string();
        let serial = hex::encode(cert.raw_serial());
        let validity = cert.validity();
        let spki = cert.public_key();

        Ok(Self {
            der: Arc::from(der),
            subject: cert.subject().to_string(),
            entity_key: EntityKey::from_issuer_serial(&issuer, &serial),
            issuer,
            serial,
            not_before: Utc.timestamp_opt(validity.not_before.timestamp(), 0).single(),
            not_after: Utc.timestamp_opt(validity.not_after.timestamp(), 0).single(),
            key_algorithm: spki.algorithm.algorithm.to_id_string(),
            public_key: spki.subject_public_key.data.to_vec(),
        })
    }

    /// Decode a base64 (standard alphabet) DER certificate.
    pub fn from_base64(encoded: &str) -> TlResult<Self> {
        let cleaned: String = encoded.split_whitespace().collect();
        let der = general_purpose::STANDARD
            .decode(cleaned)
            .map_err(|e| TlError::InvalidCertificate(format!("Failed to decode base64: {}", e)))?;
        Self::from_der(&der)
    }

    /// Build a token from fields already extracted by another parser.
    pub fn from_parts(
        der: Vec<u8>,
        subject: &str,
        issuer: &str,
        serial_hex: &str,
        key_algorithm: &str,
        public_key: Vec<u8>,
    ) -> Self {
        Self {
            der: Arc::from(der),
            subject: subject.to_string(),
            issuer: issuer.to_string(),
            serial: serial_hex.to_ascii_lowercase(),
            not_before: None,
            not_after: None,
            key_algorithm: key_algorithm.to_string(),
            public_key,
            entity_key: EntityKey::from_issuer_serial(issuer, serial_hex),
        }
    }

    pub fn entity_key(&self) -> &EntityKey {
        &self.entity_key
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.der)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.not_after
    }

    pub fn key_algorithm(&self) -> &str {
        &self.key_algorithm
    }

    /// Raw subject public key bits.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl PartialEq for CertificateToken {
    fn eq(&self, other: &Self) -> bool {
        self.entity_key == other.entity_key
    }
}

impl Eq for CertificateToken {}

impl std::hash::Hash for CertificateToken {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.entity_key.hash(state);
    }
}

/// Digest of a certificate set, independent of order and duplicates.
pub fn certificate_set_digest<'a, I>(certificates: I) -> String
where
    I: IntoIterator<Item = &'a CertificateToken>,
{
    let mut keys: Vec<&str> = certificates
        .into_iter()
        .map(|c| c.entity_key().as_str())
        .collect();
    keys.sort_unstable();
    keys.dedup();

    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Self-signed certificate with a fresh key pair.
    pub fn generate_certificate(common_name: &str) -> CertificateToken {
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, common_name);
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        CertificateToken::from_der(cert.der()).unwrap()
    }
}
