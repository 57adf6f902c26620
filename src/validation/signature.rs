//! Signature verification seam and the reference Ed25519 verifier.
//!
//! The engine hands a document and an ordered candidate certificate set to a
//! `SignatureVerifier` and records the verdict. Real deployments plug in a
//! XAdES engine; the Ed25519 verifier here covers the normalized JSON form.

use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::model::{CertificateToken, EntityKey, ED25519_OID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureVerdict {
    Valid,
    Invalid,
    Indeterminate,
}

impl SignatureVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureVerdict::Valid => "VALID",
            SignatureVerdict::Invalid => "INVALID",
            SignatureVerdict::Indeterminate => "INDETERMINATE",
        }
    }
}

impl fmt::Display for SignatureVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature verification result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureCheck {
    pub verdict: SignatureVerdict,
    /// Candidate whose key validated the signature.
    pub signer: Option<EntityKey>,
    pub reason: Option<String>,
}

impl SignatureCheck {
    pub fn valid(signer: &EntityKey) -> Self {
        Self {
            verdict: SignatureVerdict::Valid,
            signer: Some(signer.clone()),
            reason: None,
        }
    }

    pub fn invalid(reason: &str) -> Self {
        Self {
            verdict: SignatureVerdict::Invalid,
            signer: None,
            reason: Some(reason.to_string()),
        }
    }

    pub fn indeterminate(reason: &str) -> Self {
        Self {
            verdict: SignatureVerdict::Indeterminate,
            signer: None,
            reason: Some(reason.to_string()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.verdict == SignatureVerdict::Valid
    }
}

/// Cryptographic verification of a document's embedded signature.
pub trait SignatureVerifier: Send + Sync {
    /// Verify `document` against `candidates`, in order.
    ///
    /// An error means no verdict could be produced; the validation stage
    /// goes to ERROR, keeps its previous outcome and is retried next cycle.
    /// A source without a current VALID outcome is not propagated.
    fn verify(
        &self,
        document: &[u8],
        candidates: &[CertificateToken],
    ) -> anyhow::Result<SignatureCheck>;
}

/// Bytes covered by the signature: the document with `signature.value`
/// removed, serialized with sorted keys.
pub fn canonical_signed_content(document: &Value) -> anyhow::Result<Vec<u8>> {
    let mut unsigned = document.clone();
    if let Some(signature) = unsigned.get_mut("signature").and_then(Value::as_object_mut) {
        signature.remove("value");
    }
    Ok(serde_json::to_vec(&unsigned)?)
}

/// Compute SHA256 hash of content.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

fn verifying_key_of(certificate: &CertificateToken) -> Option<VerifyingKey> {
    if certificate.key_algorithm() != ED25519_OID {
        return None;
    }
    let key_array: [u8; 32] = certificate.public_key().try_into().ok()?;
    VerifyingKey::from_bytes(&key_array).ok()
}

/// Ed25519 verifier for normalized JSON documents.
#[derive(Debug, Clone, Default)]
pub struct Ed25519DocumentVerifier;

impl Ed25519DocumentVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Sign a normalized document in place; used to produce fixtures.
    pub fn sign_document(document: &mut Value, signing_key: &ed25519_dalek::SigningKey) -> anyhow::Result<()> {
        use ed25519_dalek::Signer;

        let content = canonical_signed_content(document)?;
        let signature = signing_key.sign(&content);
        let object = document
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("document is not a JSON object"))?;
        let entry = object
            .entry("signature")
            .or_insert_with(|| Value::Object(Default::default()));
        let signature_object = entry
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("signature is not a JSON object"))?;
        signature_object.insert(
            "value".to_string(),
            Value::String(general_purpose::STANDARD.encode(signature.to_bytes())),
        );
        Ok(())
    }
}

impl SignatureVerifier for Ed25519DocumentVerifier {
    fn verify(
        &self,
        document: &[u8],
        candidates: &[CertificateToken],
    ) -> anyhow::Result<SignatureCheck> {
        let parsed: Value = serde_json::from_slice(document)?;

        let signature_base64 = match parsed
            .get("signature")
            .and_then(|s| s.get("value"))
            .and_then(Value::as_str)
        {
            Some(value) => value,
            None => return Ok(SignatureCheck::indeterminate("No signature provided")),
        };

        if candidates.is_empty() {
            return Ok(SignatureCheck::indeterminate("No candidate certificates"));
        }

        // Decode signature (try URL-safe first, then standard base64)
        let signature_bytes = match general_purpose::URL_SAFE_NO_PAD
            .decode(signature_base64)
            .or_else(|_| general_purpose::STANDARD.decode(signature_base64))
        {
            Ok(bytes) => bytes,
            Err(e) => return Ok(SignatureCheck::invalid(&format!("Decode error: {}", e))),
        };
        let signature = match Signature::from_slice(&signature_bytes) {
            Ok(sig) => sig,
            Err(e) => return Ok(SignatureCheck::invalid(&format!("Parse error: {}", e))),
        };

        let content = canonical_signed_content(&parsed)?;
        let mut usable = 0usize;
        for candidate in candidates {
            let key = match verifying_key_of(candidate) {
                Some(key) => key,
                None => continue,
            };
            usable += 1;
            if key.verify(&content, &signature).is_ok() {
                log::debug!(
                    "SIGNATURE_VERIFY signer={} valid=true",
                    candidate.entity_key()
                );
                return Ok(SignatureCheck::valid(candidate.entity_key()));
            }
        }

        if usable == 0 {
            return Ok(SignatureCheck::indeterminate(
                "No candidate certificate carries an Ed25519 key",
            ));
        }
        Ok(SignatureCheck::invalid(
            "Signature does not verify with any candidate certificate",
        ))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts a document when `signature.signer` names the entity key of
    /// one of the candidates. Counts its invocations.
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
            let signer = match parsed
                .get("signature")
                .and_then(|s| s.get("signer"))
                .and_then(Value::as_str)
            {
                Some(signer) => signer,
                None => return Ok(SignatureCheck::indeterminate("No signature provided")),
            };
            if candidates.is_empty() {
                return Ok(SignatureCheck::indeterminate("No candidate certificates"));
            }
            match candidates.iter().find(|c| c.entity_key().as_str() == signer) {
                Some(cert) => Ok(SignatureCheck::valid(cert.entity_key())),
                None => Ok(SignatureCheck::invalid("Signer is not a candidate")),
            }
        }
    }
}
