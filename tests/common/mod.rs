//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use tl_refresh::alerts::{Alert, AlertHandler};
use tl_refresh::logging::structured::LogContext;
use tl_refresh::model::uri;
use tl_refresh::{
    CertificateToken, EngineConfig, FilterSpec, SignatureCheck, SignatureVerifier, SourceConfig,
    SourceKind,
};

pub const LOTL_URL: &str = "https://ec.example.eu/tools/lotl/eu-lotl.json";
pub const OJ_URL: &str = "https://eur-lex.europa.eu/legal-content/EN/TXT/?uri=uriserv:OJ.C_.2019.276.01.0001.01.ENG";
pub const TL_CZ_URL: &str = "https://tsl.example.cz/tsl-cz.json";
pub const TL_SK_URL: &str = "https://tl.example.sk/tsl-sk.json";

pub fn pivot_url(n: u32) -> String {
    format!("https://ec.example.eu/tools/lotl/eu-lotl-pivot-{}.json", n)
}

/// Self-signed certificate with a fresh key pair.
pub fn certificate(common_name: &str) -> CertificateToken {
    let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    CertificateToken::from_der(cert.der()).unwrap()
}

/// Accepts a document when `signature.signer` is the entity key of one of
/// the candidates.
#[derive(Debug, Default)]
pub struct SignerKeyVerifier {
    calls: AtomicUsize,
}

impl SignerKeyVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SignatureVerifier for SignerKeyVerifier {
    fn verify(
        &self,
        document: &[u8],
        candidates: &[CertificateToken],
    ) -> anyhow::Result<SignatureCheck> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let parsed: Value = serde_json::from_slice(document)?;
        let signer = match parsed["signature"]["signer"].as_str() {
            Some(signer) => signer.to_string(),
            None => return Ok(SignatureCheck::indeterminate("No signature provided")),
        };
        if candidates.is_empty() {
            return Ok(SignatureCheck::indeterminate("No candidate certificates"));
        }
        Ok(
            match candidates.iter().find(|c| c.entity_key().as_str() == signer) {
                Some(cert) => SignatureCheck::valid(cert.entity_key()),
                None => SignatureCheck::invalid("Signer is not a candidate"),
            },
        )
    }
}

/// Keeps every alert it receives.
#[derive(Debug, Default)]
pub struct CollectingAlertHandler {
    pub alerts: Mutex<Vec<Alert>>,
}

impl CollectingAlertHandler {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.alerts.lock().iter().map(|a| a.kind()).collect()
    }
}

impl AlertHandler for CollectingAlertHandler {
    fn handle(&self, _ctx: &LogContext, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}

fn encode(certificates: &[&CertificateToken]) -> Vec<String> {
    certificates.iter().map(|c| c.to_base64()).collect()
}

fn to_bytes(document: Value) -> Vec<u8> {
    serde_json::to_vec(&document).unwrap()
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

/// A TL pointer announced by a LOTL.
pub struct Pointer<'a> {
    pub location: &'a str,
    pub territory: &'a str,
    pub signers: Vec<&'a CertificateToken>,
}

/// LOTL (or pivot) document.
pub struct LotlDocument<'a> {
    pub sequence: u64,
    pub issued: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub signer: &'a CertificateToken,
    /// Certificates announced for signing the LOTL itself.
    pub announced: Vec<&'a CertificateToken>,
    pub lotl_location: &'a str,
    /// Most recent first.
    pub pivots: Vec<String>,
    pub announcement_url: Option<&'a str>,
    pub pointers: Vec<Pointer<'a>>,
}

impl<'a> LotlDocument<'a> {
    pub fn new(signer: &'a CertificateToken, announced: Vec<&'a CertificateToken>) -> Self {
        Self {
            sequence: 300,
            issued: days_ago(10),
            next_update: Utc::now() + Duration::days(120),
            signer,
            announced,
            lotl_location: LOTL_URL,
            pivots: Vec::new(),
            announcement_url: Some(OJ_URL),
            pointers: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut uris: Vec<String> = self.pivots.clone();
        if let Some(url) = self.announcement_url {
            uris.push(url.to_string());
        }
        let mut pointers = vec![json!({
            "location": self.lotl_location,
            "territory": "EU",
            "tsl_type": uri::TSL_TYPE_EU_LOTL,
            "mime_type": "application/json",
            "certificates": encode(&self.announced),
        })];
        for pointer in &self.pointers {
            pointers.push(json!({
                "location": pointer.location,
                "territory": pointer.territory,
                "tsl_type": uri::TSL_TYPE_EU_GENERIC,
                "mime_type": "application/json",
                "certificates": encode(&pointer.signers),
            }));
        }
        to_bytes(json!({
            "scheme": {
                "tsl_type": uri::TSL_TYPE_EU_LOTL,
                "version": 5,
                "sequence_number": self.sequence,
                "territory": "EU",
                "issue_date": self.issued,
                "next_update": self.next_update,
                "distribution_points": [self.lotl_location],
                "scheme_information_uris": uris,
                "pointers": pointers,
            },
            "providers": [],
            "signature": {"signer": self.signer.entity_key().as_str()}
        }))
    }
}

/// One granted qualified CA service per entry.
pub struct TlDocument<'a> {
    pub territory: &'a str,
    pub sequence: u64,
    pub next_update: DateTime<Utc>,
    pub signer: &'a CertificateToken,
    pub services: Vec<(&'a str, &'a CertificateToken)>,
}

impl<'a> TlDocument<'a> {
    pub fn new(territory: &'a str, signer: &'a CertificateToken) -> Self {
        Self {
            territory,
            sequence: 42,
            next_update: Utc::now() + Duration::days(180),
            signer,
            services: Vec::new(),
        }
    }

    pub fn service(mut self, provider: &'a str, certificate: &'a CertificateToken) -> Self {
        self.services.push((provider, certificate));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let providers: Vec<Value> = self
            .services
            .iter()
            .map(|(provider, certificate)| {
                json!({
                    "names": {"en": [provider]},
                    "territory": self.territory,
                    "services": [{
                        "certificates": [certificate.to_base64()],
                        "history": [
                            {
                                "start": days_ago(400),
                                "status": uri::STATUS_UNDER_SUPERVISION,
                                "type": uri::SERVICE_TYPE_CA_QC,
                                "names": {"en": [format!("{} CA", provider)]}
                            },
                            {
                                "start": days_ago(200),
                                "status": uri::STATUS_GRANTED,
                                "type": uri::SERVICE_TYPE_CA_QC,
                                "names": {"en": [format!("{} CA", provider)]}
                            }
                        ]
                    }]
                })
            })
            .collect();
        to_bytes(json!({
            "scheme": {
                "tsl_type": uri::TSL_TYPE_EU_GENERIC,
                "version": 5,
                "sequence_number": self.sequence,
                "territory": self.territory,
                "issue_date": days_ago(5),
                "next_update": self.next_update,
            },
            "providers": providers,
            "signature": {"signer": self.signer.entity_key().as_str()}
        }))
    }
}

pub fn lotl_source(roots: &[&CertificateToken]) -> SourceConfig {
    SourceConfig {
        url: LOTL_URL.to_string(),
        kind: SourceKind::Lotl,
        parent: None,
        pivot_support: true,
        signing_certificates: encode(roots),
        filters: FilterSpec::default(),
        expected_announcement_url: Some(OJ_URL.to_string()),
        expected_lotl_location: Some(LOTL_URL.to_string()),
    }
}

/// A TL configured on its own, trusted through `signers`.
pub fn tl_source(url: &str, signers: &[&CertificateToken]) -> SourceConfig {
    SourceConfig {
        url: url.to_string(),
        kind: SourceKind::Tl,
        parent: None,
        pivot_support: false,
        signing_certificates: encode(signers),
        filters: FilterSpec::default(),
        expected_announcement_url: None,
        expected_lotl_location: None,
    }
}

pub fn config(sources: Vec<SourceConfig>) -> EngineConfig {
    EngineConfig {
        sources,
        source_timeout_secs: 10,
        ..EngineConfig::default()
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
