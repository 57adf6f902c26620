//! Per-source stage pipeline.
//!
//! Coordinates the processing of one source within a cycle:
//! 1. Download (bounded by the per-source timeout and size ceiling)
//! 2. Parsing, skipped when the download fingerprint is unchanged
//! 3. Pivot chain, for LOTLs with pivot support
//! 4. Signature validation, skipped when document and candidates are unchanged
//!
//! Every failure is captured into the node's records; nothing escapes the
//! pipeline. Pipelines work on their own copy of the node.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::{CacheStore, DownloadResult, NodeKind, SourceNode, ValidationOutcome};
use crate::config::{ResourceLimits, SourceDescriptor, SourceId};
use crate::error::{CapturedError, TlError};
use crate::fetch::FetchAdapter;
use crate::logging::structured::LogContext;
use crate::model::{certificate_set_digest, CertificateToken, ParsingResult};
use crate::parsing::ParsingTask;
use crate::pivot::{record_broken_chain, validation_input, ChainOutcome, PivotChainProcessor};
use crate::validation::{SignatureVerifier, StructureVerifier};

/// Collaborators and settings shared by every pipeline of a cycle.
#[derive(Clone)]
pub struct PipelineEnv {
    pub fetcher: Arc<dyn FetchAdapter>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub structure: Arc<StructureVerifier>,
    pub limits: ResourceLimits,
    pub source_timeout: Duration,
    pub now: DateTime<Utc>,
}

/// What a LOTL pipeline hands back to the orchestrator.
#[derive(Debug)]
pub struct LotlOutcome {
    pub node: SourceNode,
    pub pivots: Vec<SourceNode>,
    /// Descriptors of the TLs announced by the latest parsing result.
    pub derived: Vec<SourceDescriptor>,
    pub chain: Option<ChainOutcome>,
}

// [1] DOWNLOAD
pub async fn download_stage(node: &mut SourceNode, env: &PipelineEnv, ctx: &LogContext) {
    let url = node.descriptor.url.clone();
    let fetched = match tokio::time::timeout(env.source_timeout, env.fetcher.fetch(&url)).await {
        Ok(Ok(doc)) => doc,
        Ok(Err(e)) => {
            let err = TlError::Fetch {
                url,
                reason: format!("{:#}", e),
            };
            crate::log_error!(ctx, "DOWNLOAD_FAILED", error = err.to_string());
            node.download.fail(CapturedError::from(&err), env.now);
            return;
        }
        Err(_) => {
            let err = TlError::FetchTimeout(env.source_timeout.as_secs());
            crate::log_error!(ctx, "DOWNLOAD_TIMEOUT", timeout_secs = env.source_timeout.as_secs());
            node.download.fail(CapturedError::from(&err), env.now);
            return;
        }
    };

    if fetched.bytes.len() > env.limits.max_document_bytes {
        let err = TlError::ResourceExhausted {
            what: "document size",
            actual: fetched.bytes.len(),
            limit: env.limits.max_document_bytes,
        };
        crate::log_error!(ctx, "DOWNLOAD_REJECTED", error = err.to_string());
        node.download.fail(CapturedError::from(&err), env.now);
        return;
    }

    let fingerprint = fetched.effective_fingerprint();
    if node.download.is_fresh_for(&fingerprint) {
        node.download.confirm(env.now);
        crate::log_debug!(ctx, "DOWNLOAD_UNCHANGED", fingerprint = fingerprint.as_str());
        return;
    }

    node.download.desynchronize(env.now);
    let size = fetched.bytes.len();
    node.download.succeed(
        DownloadResult {
            bytes: fetched.bytes,
            fingerprint: fingerprint.clone(),
        },
        &fingerprint,
        env.now,
    );
    crate::log_info!(ctx, "DOWNLOAD_UPDATED", bytes = size, fingerprint = fingerprint.as_str());
}

// [2] PARSING
pub fn parse_stage(node: &mut SourceNode, env: &PipelineEnv, ctx: &LogContext) {
    let download = match node.download.result() {
        Some(download) => Arc::clone(download),
        None => {
            crate::log_debug!(ctx, "PARSING_SKIPPED", reason = "never_downloaded");
            return;
        }
    };

    if node.parsing.is_fresh_for(&download.fingerprint) {
        node.parsing.confirm(env.now);
        crate::log_debug!(ctx, "PARSING_UNCHANGED", fingerprint = download.fingerprint.as_str());
        return;
    }

    // the validated content is about to be replaced
    node.parsing.desynchronize(env.now);
    node.validation.desynchronize(env.now);

    let task = ParsingTask::new(&node.descriptor, &env.limits, &env.structure, ctx);
    match task.run(&download.bytes) {
        Ok(result) => {
            if !result.structure_violations.is_empty() {
                crate::log_warn!(
                    ctx,
                    "PARSING_STRUCTURE_VIOLATIONS",
                    count = result.structure_violations.len(),
                    first = result.structure_violations[0].as_str()
                );
            }
            crate::log_info!(
                ctx,
                "PARSING_UPDATED",
                sequence_number = result.sequence_number,
                providers = result.providers().len(),
                tl_pointers = result.tl_pointers().len(),
                pivots = result.pivot_urls().len()
            );
            node.parsing.succeed(result, &download.fingerprint, env.now);
        }
        Err(e) => {
            crate::log_error!(ctx, "PARSING_FAILED", error = e.to_string());
            node.parsing.fail(CapturedError::from(&e), env.now);
        }
    }
}

// [4] SIGNATURE VALIDATION
pub fn validate_stage(
    node: &mut SourceNode,
    candidates: &[CertificateToken],
    env: &PipelineEnv,
    ctx: &LogContext,
) {
    let download = match node.download.result() {
        Some(download) => Arc::clone(download),
        None => {
            crate::log_debug!(ctx, "VALIDATION_SKIPPED", reason = "never_downloaded");
            return;
        }
    };
    if !node.parsing.is_fresh_for(&download.fingerprint) {
        node.validation.desynchronize(env.now);
        crate::log_warn!(ctx, "VALIDATION_SKIPPED", reason = "parsing_not_current");
        return;
    }

    let input = validation_input(&download.fingerprint, candidates);
    if node.validation.is_fresh_for(&input) {
        node.validation.confirm(env.now);
        crate::log_debug!(ctx, "VALIDATION_UNCHANGED", candidates = candidates.len());
        return;
    }

    node.validation.desynchronize(env.now);
    let check = match env.verifier.verify(&download.bytes, candidates) {
        Ok(check) => check,
        Err(e) => {
            let err = TlError::Verification(format!("{:#}", e));
            crate::log_error!(ctx, "VALIDATION_FAILED", error = err.to_string());
            node.validation.fail(CapturedError::from(&err), env.now);
            return;
        }
    };

    if check.is_valid() {
        crate::log_info!(
            ctx,
            "VALIDATION_UPDATED",
            verdict = check.verdict.as_str(),
            candidates = candidates.len()
        );
    } else {
        crate::log_warn!(
            ctx,
            "VALIDATION_REJECTED",
            verdict = check.verdict.as_str(),
            reason = check.reason.as_deref().unwrap_or(""),
            candidates = candidates.len()
        );
    }
    node.validation.succeed(
        ValidationOutcome {
            check,
            candidates_digest: certificate_set_digest(candidates),
            candidate_count: candidates.len(),
            chain_broken: false,
        },
        &input,
        env.now,
    );
}

/// Download, parse and validate a TL with `candidates`.
pub async fn run_tl_pipeline(
    mut node: SourceNode,
    candidates: Vec<CertificateToken>,
    env: PipelineEnv,
    ctx: LogContext,
) -> SourceNode {
    crate::log_debug!(ctx, "PIPELINE_START", kind = node.descriptor.kind.as_str());
    download_stage(&mut node, &env, &ctx).await;
    parse_stage(&mut node, &env, &ctx);
    validate_stage(&mut node, &candidates, &env, &ctx);
    crate::log_debug!(
        ctx,
        "PIPELINE_COMPLETE",
        download = node.download.status().as_str(),
        parsing = node.parsing.status().as_str(),
        validation = node.validation.status().as_str()
    );
    node
}

/// Download and parse a LOTL, walk its pivot chain, validate it and
/// derive its children.
///
/// `store` is only used to look up and register this LOTL's pivots, which
/// no other pipeline touches.
pub async fn run_lotl_pipeline(
    mut node: SourceNode,
    store: Arc<CacheStore>,
    env: PipelineEnv,
    ctx: LogContext,
) -> LotlOutcome {
    crate::log_debug!(ctx, "PIPELINE_START", kind = node.descriptor.kind.as_str());
    download_stage(&mut node, &env, &ctx).await;
    parse_stage(&mut node, &env, &ctx);

    let roots = node.descriptor.signing_certificates.clone();
    let current = current_parsing(&node);

    // [3] PIVOT CHAIN
    let mut pivots: Vec<SourceNode> = Vec::new();
    let mut chain: Option<ChainOutcome> = None;
    if node.descriptor.pivot_support {
        if let Some(result) = &current {
            pivots = load_pivots(&node.descriptor, result, &store, &env, &ctx).await;
            let processor = PivotChainProcessor::new(env.verifier.as_ref(), &ctx, env.now);
            chain = Some(processor.process(&roots, &mut pivots));
        }
    }

    match &chain {
        Some(outcome) if outcome.is_broken() => {
            crate::log_error!(
                ctx,
                "VALIDATION_FORCED_INDETERMINATE",
                broken_at = outcome.broken_at.as_ref().map(|id| id.to_string())
            );
            record_broken_chain(&mut node, env.now);
        }
        Some(outcome) => validate_stage(&mut node, &outcome.trusted, &env, &ctx),
        None => validate_stage(&mut node, &roots, &env, &ctx),
    }

    if node.is_trusted() {
        if let (Some(result), NodeKind::Lotl { last_valid, .. }) = (&current, &mut node.kind) {
            *last_valid = Some(Arc::clone(result));
        }
    }

    let derived = match node.parsing_result() {
        Some(result) => derive_children(&node.descriptor, result, &ctx),
        None => Vec::new(),
    };
    if let NodeKind::Lotl {
        children,
        pivots: pivot_ids,
        ..
    } = &mut node.kind
    {
        *children = derived.iter().map(|d| d.id.clone()).collect();
        *pivot_ids = pivots.iter().map(|p| p.id().clone()).collect();
    }

    crate::log_debug!(
        ctx,
        "PIPELINE_COMPLETE",
        download = node.download.status().as_str(),
        parsing = node.parsing.status().as_str(),
        validation = node.validation.status().as_str(),
        children = derived.len(),
        pivots = pivots.len()
    );

    LotlOutcome {
        node,
        pivots,
        derived,
        chain,
    }
}

/// The parsing result matching the current download, if parsing succeeded.
fn current_parsing(node: &SourceNode) -> Option<Arc<ParsingResult>> {
    let download = node.download.result()?;
    if node.parsing.is_fresh_for(&download.fingerprint) {
        node.parsing_result().cloned()
    } else {
        None
    }
}

/// Fetch and parse every pivot listed by `result`, most recent first.
async fn load_pivots(
    lotl: &SourceDescriptor,
    result: &ParsingResult,
    store: &CacheStore,
    env: &PipelineEnv,
    ctx: &LogContext,
) -> Vec<SourceNode> {
    let mut pivots = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for url in result.pivot_urls() {
        if !seen.insert(url.as_str()) {
            crate::log_warn!(ctx, "PIVOT_URL_DUPLICATE", url = url.as_str());
            continue;
        }
        let descriptor = SourceDescriptor::pivot(url, lotl);
        let id = descriptor.id.clone();
        if !store.ensure_derived(descriptor) {
            crate::log_warn!(ctx, "PIVOT_URL_CONFLICT", url = url.as_str());
            continue;
        }
        let mut pivot = match store.get(&id) {
            Some(pivot) => pivot,
            None => continue,
        };
        let pivot_ctx = ctx.with_source(url);
        download_stage(&mut pivot, env, &pivot_ctx).await;
        parse_stage(&mut pivot, env, &pivot_ctx);
        pivots.push(pivot);
    }
    pivots
}

/// Descriptors for the TLs a LOTL points to. Duplicate urls are skipped.
fn derive_children(
    lotl: &SourceDescriptor,
    result: &ParsingResult,
    ctx: &LogContext,
) -> Vec<SourceDescriptor> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut derived = Vec::new();
    for pointer in result.tl_pointers() {
        if !seen.insert(pointer.location.as_str()) {
            crate::log_warn!(ctx, "DERIVED_URL_DUPLICATE", url = pointer.location.as_str());
            continue;
        }
        derived.push(SourceDescriptor::derived_tl(&pointer.location, lotl));
    }
    derived
}

/// Certificates a LOTL announces for the TL at `url`.
pub fn candidates_for(lotl_result: Option<&Arc<ParsingResult>>, url: &str) -> Vec<CertificateToken> {
    lotl_result
        .map(|result| {
            result
                .tl_pointers()
                .iter()
                .filter(|pointer| pointer.location == url)
                .flat_map(|pointer| pointer.certificates.iter().cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// Identifiers referenced by a LOTL outcome: its children and its pivots.
pub fn referenced_ids(outcome: &LotlOutcome) -> HashSet<SourceId> {
    outcome
        .derived
        .iter()
        .map(|d| d.id.clone())
        .chain(outcome.pivots.iter().map(|p| p.id().clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStatus;
    use crate::config::{FilterSpec, SourceConfig, SourceKind};
    use crate::fetch::InMemoryFetcher;
    use crate::model::certificate::test_support::generate_certificate;
    use crate::validation::signature::test_support::SignerKeyVerifier;
    use crate::validation::SignatureVerdict;
    use serde_json::json;

    const TL_URL: &str = "https://example.org/tl.json";

    fn tl_node() -> SourceNode {
        SourceNode::new(
            SourceDescriptor::from_config(&SourceConfig {
                url: TL_URL.to_string(),
                kind: SourceKind::Tl,
                parent: None,
                pivot_support: false,
                signing_certificates: vec![],
                filters: FilterSpec::default(),
                expected_announcement_url: None,
                expected_lotl_location: None,
            })
            .unwrap(),
        )
    }

    fn tl_document(signer: &CertificateToken, sequence: u64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "scheme": {
                "tsl_type": "http://uri.etsi.org/TrstSvc/TrustedList/TSLType/EUgeneric",
                "version": 5,
                "sequence_number": sequence,
                "territory": "CZ"
            },
            "providers": [],
            "signature": {"signer": signer.entity_key().as_str()}
        }))
        .unwrap()
    }

    fn env(fetcher: Arc<InMemoryFetcher>, verifier: Arc<SignerKeyVerifier>) -> PipelineEnv {
        PipelineEnv {
            fetcher,
            verifier,
            structure: Arc::new(StructureVerifier::new(vec![5, 6])),
            limits: ResourceLimits::default(),
            source_timeout: Duration::from_secs(5),
            now: Utc::now(),
        }
    }

    fn ctx() -> LogContext {
        LogContext::new("cycle-test").with_source(TL_URL)
    }

    #[tokio::test]
    async fn test_unchanged_content_skips_parse_and_verify() {
        let signer = generate_certificate("Signer");
        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher.insert(TL_URL, tl_document(&signer, 1));
        let verifier = Arc::new(SignerKeyVerifier::default());
        let env = env(fetcher.clone(), verifier.clone());

        let node = run_tl_pipeline(tl_node(), vec![signer.clone()], env.clone(), ctx()).await;
        assert!(node.is_trusted());
        let first_parse = Arc::clone(node.parsing_result().unwrap());

        let node = run_tl_pipeline(node, vec![signer.clone()], env, ctx()).await;
        assert_eq!(verifier.calls(), 1);
        assert!(Arc::ptr_eq(&first_parse, node.parsing_result().unwrap()));
        assert!(node.is_trusted());
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_previous_results() {
        let signer = generate_certificate("Signer");
        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher.insert(TL_URL, tl_document(&signer, 1));
        let verifier = Arc::new(SignerKeyVerifier::default());
        let env = env(fetcher.clone(), verifier);

        let node = run_tl_pipeline(tl_node(), vec![signer.clone()], env.clone(), ctx()).await;
        fetcher.remove(TL_URL);
        let node = run_tl_pipeline(node, vec![signer.clone()], env, ctx()).await;

        assert_eq!(node.download.status(), CacheStatus::Error);
        assert!(node.download.error().unwrap().message.contains("fetch failed"));
        assert!(node.download.result().is_some());
        assert!(node.is_trusted());
    }

    #[tokio::test]
    async fn test_parse_failure_excludes_source() {
        let signer = generate_certificate("Signer");
        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher.insert(TL_URL, tl_document(&signer, 1));
        let verifier = Arc::new(SignerKeyVerifier::default());
        let env = env(fetcher.clone(), verifier);

        let node = run_tl_pipeline(tl_node(), vec![signer.clone()], env.clone(), ctx()).await;
        fetcher.insert(TL_URL, b"{not json".to_vec());
        let node = run_tl_pipeline(node, vec![signer.clone()], env, ctx()).await;

        assert_eq!(node.parsing.status(), CacheStatus::Error);
        assert!(node.parsing_result().is_some());
        assert_eq!(node.validation.status(), CacheStatus::Desynchronized);
        assert!(!node.is_trusted());
    }

    #[tokio::test]
    async fn test_oversized_document_rejected() {
        let signer = generate_certificate("Signer");
        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher.insert(TL_URL, tl_document(&signer, 1));
        let verifier = Arc::new(SignerKeyVerifier::default());
        let mut env = env(fetcher, verifier.clone());
        env.limits.max_document_bytes = 16;

        let node = run_tl_pipeline(tl_node(), vec![signer], env, ctx()).await;
        assert_eq!(node.download.status(), CacheStatus::Error);
        assert!(node
            .download
            .error()
            .unwrap()
            .message
            .contains("document size"));
        assert!(node.parsing_result().is_none());
        assert_eq!(verifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let signer = generate_certificate("Signer");
        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher.insert(TL_URL, tl_document(&signer, 1));
        fetcher.set_delay(TL_URL, Duration::from_millis(500));
        let verifier = Arc::new(SignerKeyVerifier::default());
        let mut env = env(fetcher, verifier);
        env.source_timeout = Duration::from_millis(20);

        let node = run_tl_pipeline(tl_node(), vec![signer], env, ctx()).await;
        assert_eq!(node.download.status(), CacheStatus::Error);
        assert!(node.download.error().unwrap().message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_new_candidates_trigger_revalidation() {
        let signer = generate_certificate("Signer");
        let other = generate_certificate("Other");
        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher.insert(TL_URL, tl_document(&signer, 1));
        let verifier = Arc::new(SignerKeyVerifier::default());
        let env = env(fetcher, verifier.clone());

        let node = run_tl_pipeline(tl_node(), vec![signer.clone()], env.clone(), ctx()).await;
        let node = run_tl_pipeline(node, vec![other], env, ctx()).await;

        assert_eq!(verifier.calls(), 2);
        assert_eq!(node.current_verdict(), Some(SignatureVerdict::Invalid));
    }

    struct UnavailableVerifier;

    impl SignatureVerifier for UnavailableVerifier {
        fn verify(
            &self,
            _document: &[u8],
            _candidates: &[CertificateToken],
        ) -> anyhow::Result<crate::validation::SignatureCheck> {
            Err(anyhow::anyhow!("token not reachable"))
        }
    }

    #[tokio::test]
    async fn test_verifier_error_is_stage_error_and_retried() {
        let signer = generate_certificate("Signer");
        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher.insert(TL_URL, tl_document(&signer, 1));
        let verifier = Arc::new(SignerKeyVerifier::default());
        let mut failing = env(fetcher.clone(), verifier.clone());
        failing.verifier = Arc::new(UnavailableVerifier);

        let node = run_tl_pipeline(tl_node(), vec![signer.clone()], failing, ctx()).await;
        assert_eq!(node.validation.status(), CacheStatus::Error);
        assert!(node
            .validation
            .error()
            .unwrap()
            .message
            .contains("token not reachable"));
        assert_eq!(node.current_verdict(), None);
        assert!(!node.is_trusted());

        let node = run_tl_pipeline(node, vec![signer], env(fetcher, verifier.clone()), ctx()).await;
        assert_eq!(verifier.calls(), 1);
        assert!(node.is_trusted());
    }

    #[test]
    fn test_candidates_for_matches_pointer_location() {
        use crate::model::{uri, ListContent, OtherTslPointer};
        let cert = generate_certificate("TL signer");
        let result = Arc::new(ParsingResult {
            tsl_type: Some(uri::TSL_TYPE_EU_LOTL.to_string()),
            sequence_number: None,
            version: Some(5),
            territory: None,
            issue_date: None,
            next_update: None,
            distribution_points: vec![],
            content: ListContent::ListOfLists {
                lotl_pointers: vec![],
                tl_pointers: vec![OtherTslPointer {
                    location: TL_URL.to_string(),
                    territory: Some("CZ".to_string()),
                    tsl_type: Some(uri::TSL_TYPE_EU_GENERIC.to_string()),
                    mime_type: None,
                    certificates: vec![cert.clone()],
                }],
                pivot_urls: vec![],
                signing_certificate_announcement_url: None,
            },
            structure_violations: vec![],
        });

        assert_eq!(candidates_for(Some(&result), TL_URL), vec![cert]);
        assert!(candidates_for(Some(&result), "https://example.org/other.json").is_empty());
        assert!(candidates_for(None, TL_URL).is_empty());
    }
}
