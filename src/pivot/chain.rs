//! Pivot chain verification.
//!
//! The LOTL signing certificate rotates over time. Each rotation freezes the
//! previous LOTL as a pivot. Starting from the configured root set, pivots
//! are verified oldest to newest; every valid pivot hands the certificates
//! it announces for the LOTL to the next link. The first failure breaks the
//! chain and nothing announced after it is trusted this cycle.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use super::status::{CertificatePivotStatus, PivotCertificateEntry};
use crate::cache::{NodeKind, SourceNode, ValidationOutcome};
use crate::config::SourceId;
use crate::error::{CapturedError, TlError};
use crate::logging::structured::LogContext;
use crate::model::{certificate_set_digest, CertificateToken, EntityKey};
use crate::validation::{SignatureCheck, SignatureVerifier};

/// Result of walking the chain.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    /// Certificates to verify the live LOTL with.
    pub trusted: Vec<CertificateToken>,
    /// First pivot that failed, if any.
    pub broken_at: Option<SourceId>,
    /// Pivots whose verdict was computed rather than reused.
    pub verified: usize,
}

impl ChainOutcome {
    pub fn is_broken(&self) -> bool {
        self.broken_at.is_some()
    }
}

/// Input fingerprint of a validation: document plus candidate set.
pub fn validation_input(download_fingerprint: &str, candidates: &[CertificateToken]) -> String {
    format!("{}:{}", download_fingerprint, certificate_set_digest(candidates))
}

/// Input fingerprint of a validation skipped because the chain is broken.
pub fn broken_chain_input(download_fingerprint: &str) -> String {
    format!("{}:chain-broken", download_fingerprint)
}

/// Status of every certificate in `incoming` and `announced`.
pub fn certificate_status_map(
    incoming: &[CertificateToken],
    announced: &[CertificateToken],
) -> BTreeMap<EntityKey, PivotCertificateEntry> {
    let incoming_keys: HashSet<&EntityKey> = incoming.iter().map(|c| c.entity_key()).collect();
    let announced_keys: HashSet<&EntityKey> = announced.iter().map(|c| c.entity_key()).collect();

    let mut map = BTreeMap::new();
    for cert in announced {
        let status = if incoming_keys.contains(cert.entity_key()) {
            CertificatePivotStatus::StillTrusted
        } else {
            CertificatePivotStatus::Added
        };
        map.insert(
            cert.entity_key().clone(),
            PivotCertificateEntry {
                certificate: cert.clone(),
                status,
            },
        );
    }
    for cert in incoming {
        if !announced_keys.contains(cert.entity_key()) {
            map.insert(
                cert.entity_key().clone(),
                PivotCertificateEntry {
                    certificate: cert.clone(),
                    status: CertificatePivotStatus::Withdrawn,
                },
            );
        }
    }
    map
}

/// Record a verdict that was forced without calling the verifier.
pub fn record_broken_chain(node: &mut SourceNode, now: DateTime<Utc>) {
    let input = node
        .download
        .result()
        .map(|d| broken_chain_input(&d.fingerprint))
        .unwrap_or_else(|| broken_chain_input(""));
    if node.validation.is_fresh_for(&input) {
        node.validation.confirm(now);
        return;
    }
    node.validation.succeed(
        ValidationOutcome {
            check: SignatureCheck::indeterminate("Pivot chain is broken"),
            candidates_digest: certificate_set_digest(std::iter::empty::<&CertificateToken>()),
            candidate_count: 0,
            chain_broken: true,
        },
        &input,
        now,
    );
}

pub struct PivotChainProcessor<'a> {
    verifier: &'a dyn SignatureVerifier,
    ctx: &'a LogContext,
    now: DateTime<Utc>,
}

impl<'a> PivotChainProcessor<'a> {
    pub fn new(verifier: &'a dyn SignatureVerifier, ctx: &'a LogContext, now: DateTime<Utc>) -> Self {
        Self { verifier, ctx, now }
    }

    /// Walk `pivots` (most recent first, as listed by the LOTL) from the
    /// oldest one, starting with `roots`.
    pub fn process(&self, roots: &[CertificateToken], pivots: &mut [SourceNode]) -> ChainOutcome {
        let mut trusted: Vec<CertificateToken> = roots.to_vec();
        let mut broken_at: Option<SourceId> = None;
        let mut verified = 0usize;
        let total = pivots.len();

        for (position, pivot) in pivots.iter_mut().rev().enumerate() {
            let ctx = self.ctx.with_source(pivot.id().as_str());
            set_chain_position(pivot, position);

            if broken_at.is_some() {
                record_broken_chain(pivot, self.now);
                set_certificate_status(pivot, BTreeMap::new());
                crate::log_warn!(ctx, "PIVOT_SKIPPED", position = position, reason = "chain_broken");
                continue;
            }

            let (announced, input, verified_now) = match self.verify_link(pivot, &trusted, &ctx) {
                Some(link) => link,
                None => {
                    set_certificate_status(pivot, BTreeMap::new());
                    broken_at = Some(pivot.id().clone());
                    crate::log_error!(
                        ctx,
                        "PIVOT_CHAIN_BROKEN",
                        position = position,
                        total = total,
                        trusted_count = trusted.len()
                    );
                    continue;
                }
            };
            if verified_now {
                verified += 1;
            }

            let status = certificate_status_map(&trusted, &announced);
            crate::log_info!(
                ctx,
                "PIVOT_VERIFIED",
                position = position,
                input = input.as_str(),
                announced = announced.len(),
                withdrawn = status
                    .values()
                    .filter(|e| e.status == CertificatePivotStatus::Withdrawn)
                    .count()
            );
            set_certificate_status(pivot, status);
            trusted = announced;
        }

        ChainOutcome {
            trusted,
            broken_at,
            verified,
        }
    }

    /// Verify one pivot with `trusted`. Returns the announced set, the
    /// validation input and whether the verifier was invoked, or `None`
    /// when the link does not hold.
    fn verify_link(
        &self,
        pivot: &mut SourceNode,
        trusted: &[CertificateToken],
        ctx: &LogContext,
    ) -> Option<(Vec<CertificateToken>, String, bool)> {
        let download = match pivot.download.result() {
            Some(d) => d.clone(),
            None => {
                pivot.validation.fail(
                    CapturedError::new("Pivot has never been downloaded", "PivotUnavailable"),
                    self.now,
                );
                return None;
            }
        };
        let parsed = match pivot.parsing.result() {
            Some(p) if pivot.parsing.is_fresh_for(&download.fingerprint) => p.clone(),
            _ => {
                pivot.validation.desynchronize(self.now);
                crate::log_warn!(ctx, "PIVOT_UNPARSED", fingerprint = download.fingerprint.as_str());
                return None;
            }
        };

        let input = validation_input(&download.fingerprint, trusted);
        let mut verified_now = false;
        if !pivot.validation.is_fresh_for(&input) {
            pivot.validation.desynchronize(self.now);
            let check = match self.verifier.verify(&download.bytes, trusted) {
                Ok(check) => check,
                Err(e) => {
                    let err = TlError::Verification(format!("{:#}", e));
                    crate::log_error!(ctx, "PIVOT_VERIFIER_FAILED", error = err.to_string());
                    pivot.validation.fail(CapturedError::from(&err), self.now);
                    return None;
                }
            };
            pivot.validation.succeed(
                ValidationOutcome {
                    check,
                    candidates_digest: certificate_set_digest(trusted),
                    candidate_count: trusted.len(),
                    chain_broken: false,
                },
                &input,
                self.now,
            );
            verified_now = true;
        } else {
            pivot.validation.confirm(self.now);
        }

        let outcome = pivot.validation.result()?;
        if !outcome.is_valid() {
            crate::log_warn!(
                ctx,
                "PIVOT_SIGNATURE_REJECTED",
                verdict = outcome.verdict().as_str(),
                reason = outcome.check.reason.as_deref().unwrap_or("")
            );
            return None;
        }

        Some((parsed.announced_lotl_signers(), input, verified_now))
    }
}

fn set_chain_position(node: &mut SourceNode, position: usize) {
    if let NodeKind::Pivot { chain_position, .. } = &mut node.kind {
        *chain_position = position;
    }
}

fn set_certificate_status(node: &mut SourceNode, status: BTreeMap<EntityKey, PivotCertificateEntry>) {
    if let NodeKind::Pivot {
        certificate_status, ..
    } = &mut node.kind
    {
        *certificate_status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DownloadResult;
    use crate::config::{FilterSpec, SourceConfig, SourceDescriptor, SourceKind};
    use crate::model::certificate::test_support::generate_certificate;
    use crate::model::{uri, ListContent, OtherTslPointer, ParsingResult};
    use crate::validation::signature::test_support::SignerKeyVerifier;
    use crate::validation::SignatureVerdict;

    fn lotl() -> SourceDescriptor {
        SourceDescriptor::from_config(&SourceConfig {
            url: "https://example.org/lotl.json".to_string(),
            kind: SourceKind::Lotl,
            parent: None,
            pivot_support: true,
            signing_certificates: vec![generate_certificate("Root").to_base64()],
            filters: FilterSpec::default(),
            expected_announcement_url: None,
            expected_lotl_location: None,
        })
        .unwrap()
    }

    /// A downloaded and parsed pivot signed by `signer` announcing `announced`.
    fn pivot(url: &str, signer: &CertificateToken, announced: &[CertificateToken]) -> SourceNode {
        let now = Utc::now();
        let mut node = SourceNode::new(SourceDescriptor::pivot(url, &lotl()));
        let bytes = serde_json::to_vec(&serde_json::json!({
            "url": url,
            "signature": {"signer": signer.entity_key().as_str()}
        }))
        .unwrap();
        let fingerprint = crate::fetch::compute_fingerprint(&bytes);
        node.download.succeed(
            DownloadResult {
                bytes,
                fingerprint: fingerprint.clone(),
            },
            &fingerprint,
            now,
        );
        node.parsing.succeed(
            ParsingResult {
                tsl_type: Some(uri::TSL_TYPE_EU_LOTL.to_string()),
                sequence_number: None,
                version: Some(5),
                territory: Some("EU".to_string()),
                issue_date: None,
                next_update: None,
                distribution_points: vec![],
                content: ListContent::ListOfLists {
                    lotl_pointers: vec![OtherTslPointer {
                        location: "https://example.org/lotl.json".to_string(),
                        territory: Some("EU".to_string()),
                        tsl_type: Some(uri::TSL_TYPE_EU_LOTL.to_string()),
                        mime_type: None,
                        certificates: announced.to_vec(),
                    }],
                    tl_pointers: vec![],
                    pivot_urls: vec![],
                    signing_certificate_announcement_url: None,
                },
                structure_violations: vec![],
            },
            &fingerprint,
            now,
        );
        node
    }

    fn status_of(node: &SourceNode, cert: &CertificateToken) -> Option<CertificatePivotStatus> {
        node.pivot_certificate_status()?
            .get(cert.entity_key())
            .map(|e| e.status)
    }

    #[test]
    fn test_chain_hands_over_announced_sets() {
        let root = generate_certificate("Root");
        let second = generate_certificate("Second");
        let live = generate_certificate("Live");

        // most recent first, as listed by the LOTL
        let mut pivots = vec![
            pivot("https://example.org/pivot-2.json", &second, &[second.clone(), live.clone()]),
            pivot("https://example.org/pivot-1.json", &root, &[root.clone(), second.clone()]),
        ];
        let verifier = SignerKeyVerifier::default();
        let ctx = LogContext::new("cycle-test");
        let outcome = PivotChainProcessor::new(&verifier, &ctx, Utc::now())
            .process(&[root.clone()], &mut pivots);

        assert!(!outcome.is_broken());
        assert_eq!(outcome.trusted, vec![second.clone(), live.clone()]);
        assert_eq!(outcome.verified, 2);

        let oldest = &pivots[1];
        assert_eq!(status_of(oldest, &root), Some(CertificatePivotStatus::StillTrusted));
        assert_eq!(status_of(oldest, &second), Some(CertificatePivotStatus::Added));

        let newest = &pivots[0];
        assert_eq!(status_of(newest, &root), Some(CertificatePivotStatus::Withdrawn));
        assert_eq!(status_of(newest, &live), Some(CertificatePivotStatus::Added));
        assert!(matches!(newest.kind, NodeKind::Pivot { chain_position: 1, .. }));
    }

    #[test]
    fn test_broken_link_stops_the_chain() {
        let root = generate_certificate("Root");
        let rogue = generate_certificate("Rogue");
        let live = generate_certificate("Live");

        let mut pivots = vec![
            pivot("https://example.org/pivot-2.json", &live, &[live.clone()]),
            pivot("https://example.org/pivot-1.json", &rogue, &[live.clone()]),
        ];
        let verifier = SignerKeyVerifier::default();
        let ctx = LogContext::new("cycle-test");
        let outcome = PivotChainProcessor::new(&verifier, &ctx, Utc::now())
            .process(&[root.clone()], &mut pivots);

        assert_eq!(outcome.broken_at, Some(SourceId::new("https://example.org/pivot-1.json")));
        // the newer pivot is never handed to the verifier
        assert_eq!(verifier.calls(), 1);
        assert_eq!(pivots[1].current_verdict(), Some(SignatureVerdict::Invalid));
        assert_eq!(pivots[0].current_verdict(), Some(SignatureVerdict::Indeterminate));
        assert!(pivots[0].validation.result().unwrap().chain_broken);
        assert!(pivots[0].pivot_certificate_status().unwrap().is_empty());
    }

    #[test]
    fn test_unchanged_chain_is_not_reverified() {
        let root = generate_certificate("Root");
        let live = generate_certificate("Live");
        let mut pivots = vec![pivot("https://example.org/pivot-1.json", &root, &[live.clone()])];
        let verifier = SignerKeyVerifier::default();
        let ctx = LogContext::new("cycle-test");
        let processor = PivotChainProcessor::new(&verifier, &ctx, Utc::now());

        processor.process(&[root.clone()], &mut pivots);
        let again = processor.process(&[root.clone()], &mut pivots);

        assert_eq!(verifier.calls(), 1);
        assert_eq!(again.verified, 0);
        assert_eq!(again.trusted, vec![live]);
    }

    #[test]
    fn test_status_map_categories() {
        let a = generate_certificate("A");
        let b = generate_certificate("B");
        let c = generate_certificate("C");
        let map = certificate_status_map(&[a.clone(), b.clone()], &[b.clone(), c.clone()]);
        assert_eq!(map[a.entity_key()].status, CertificatePivotStatus::Withdrawn);
        assert_eq!(map[b.entity_key()].status, CertificatePivotStatus::StillTrusted);
        assert_eq!(map[c.entity_key()].status, CertificatePivotStatus::Added);
        assert!(!CertificatePivotStatus::Withdrawn.is_trusted_after());
    }
}
