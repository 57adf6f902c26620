//! Engine facade and published query API.
//!
//! The engine owns the cache store and the published snapshot. Readers
//! always get a complete snapshot: the trust map and the job summary of the
//! same cycle, swapped in with one atomic pointer replacement.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::RwLock;

use super::orchestrator::{CycleReport, JobOrchestrator};
use super::summary::{JobSummary, SourceInfo};
use crate::alerts::{detect_alerts, AlertHandler};
use crate::cache::CacheStore;
use crate::config::{EngineConfig, SourceDescriptor};
use crate::error::{TlError, TlResult};
use crate::fetch::FetchAdapter;
use crate::logging::structured::LogContext;
use crate::model::{CertificateToken, EntityKey};
use crate::pipeline::{CycleContext, PipelineEnv, RefreshMode};
use crate::trust::{TrustMap, TrustProperties};
use crate::validation::{SignatureVerifier, StructureVerifier};

fn dump_summary(ctx: &LogContext, event: &str, summary: &JobSummary) {
    match summary.to_json() {
        Ok(json) => {
            crate::log_info!(ctx, event, summary = json);
        }
        Err(e) => {
            crate::log_warn!(ctx, "JOB_SUMMARY_DUMP_FAILED", error = e.to_string());
        }
    }
}

/// Everything published by one cycle.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub cycle_id: Option<String>,
    pub trust_map: Arc<TrustMap>,
    pub summary: Arc<JobSummary>,
}

pub struct TrustListEngine {
    config: RwLock<EngineConfig>,
    structure: RwLock<Arc<StructureVerifier>>,
    store: Arc<CacheStore>,
    online: Arc<dyn FetchAdapter>,
    offline: Option<Arc<dyn FetchAdapter>>,
    verifier: Arc<dyn SignatureVerifier>,
    published: ArcSwap<Snapshot>,
    alert_handlers: RwLock<Vec<Arc<dyn AlertHandler>>>,
    // descriptors from the last reconfigure, applied when the next cycle starts
    pending: parking_lot::Mutex<Option<Vec<SourceDescriptor>>>,
    // one cycle at a time
    cycle_lock: tokio::sync::Mutex<()>,
}

impl TrustListEngine {
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn FetchAdapter>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> TlResult<Self> {
        let store = Arc::new(CacheStore::new());
        store.sync_descriptors(config.descriptors()?);
        let structure = StructureVerifier::new(config.accepted_versions.clone());

        log::info!(
            "ENGINE_CREATED sources={} accepted_versions={:?}",
            config.sources.len(),
            config.accepted_versions
        );

        Ok(Self {
            config: RwLock::new(config),
            structure: RwLock::new(Arc::new(structure)),
            store,
            online: fetcher,
            offline: None,
            verifier,
            published: ArcSwap::from_pointee(Snapshot::default()),
            alert_handlers: RwLock::new(Vec::new()),
            pending: parking_lot::Mutex::new(None),
            cycle_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_offline_fetcher(mut self, fetcher: Arc<dyn FetchAdapter>) -> Self {
        self.offline = Some(fetcher);
        self
    }

    /// Replace the version table, e.g. to plug in a real schema validator.
    pub fn with_structure_verifier(self, structure: StructureVerifier) -> Self {
        *self.structure.write() = Arc::new(structure);
        self
    }

    pub fn register_alert_handler(&self, handler: Arc<dyn AlertHandler>) {
        self.alert_handlers.write().push(handler);
    }

    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// Apply a new configuration.
    ///
    /// The store is updated when the next cycle starts, never under a
    /// running one. Removed sources are purged by that cycle; changed ones
    /// are re-parsed and re-validated.
    pub fn reconfigure(&self, config: EngineConfig) -> TlResult<()> {
        let descriptors = config.descriptors()?;

        let mut current = self.config.write();
        *self.pending.lock() = Some(descriptors);
        if current.accepted_versions != config.accepted_versions {
            *self.structure.write() = Arc::new(StructureVerifier::new(config.accepted_versions.clone()));
        }
        log::info!(
            "ENGINE_RECONFIGURED sources={} previous_sources={}",
            config.sources.len(),
            current.sources.len()
        );
        *current = config;
        Ok(())
    }

    /// Run one cycle with the online fetch adapter.
    pub async fn refresh(&self) -> TlResult<CycleReport> {
        let fetcher = Arc::clone(&self.online);
        self.run_cycle(fetcher, RefreshMode::Online).await
    }

    /// Run one cycle with the offline fetch adapter.
    pub async fn offline_refresh(&self) -> TlResult<CycleReport> {
        let fetcher = self
            .offline
            .clone()
            .ok_or_else(|| TlError::Config("no offline fetcher configured".to_string()))?;
        self.run_cycle(fetcher, RefreshMode::Offline).await
    }

    async fn run_cycle(&self, fetcher: Arc<dyn FetchAdapter>, mode: RefreshMode) -> TlResult<CycleReport> {
        let _guard = self.cycle_lock.lock().await;

        let config = {
            let config = self.config.read();
            if let Some(descriptors) = self.pending.lock().take() {
                self.store.sync_descriptors(descriptors);
                log::debug!("ENGINE_DESCRIPTORS_APPLIED sources={}", config.sources.len());
            }
            config.clone()
        };
        let structure = Arc::clone(&self.structure.read());
        let cycle = CycleContext::new(mode);
        let ctx = cycle.log_context();

        let env = PipelineEnv {
            fetcher,
            verifier: Arc::clone(&self.verifier),
            structure,
            limits: config.limits,
            source_timeout: config.source_timeout(),
            now: cycle.started_at,
        };

        let outcome = JobOrchestrator::new(&config, Arc::clone(&self.store), env, cycle.clone())
            .run()
            .await;
        let mut report = outcome.report;

        if config.debug {
            dump_summary(&ctx, "JOB_SUMMARY_BEFORE", &self.published.load().summary);
        }

        // [5] PUBLISH
        let summary = Arc::new(outcome.summary);
        let snapshot = Snapshot {
            cycle_id: Some(cycle.cycle_id.clone()),
            trust_map: Arc::new(outcome.trust_map),
            summary: Arc::clone(&summary),
        };
        self.published.store(Arc::new(snapshot));
        crate::log_info!(
            ctx,
            "TRUST_MAP_PUBLISHED",
            certificates = report.certificates,
            entries = report.trust_entries
        );

        if config.debug {
            dump_summary(&ctx, "JOB_SUMMARY_AFTER", &summary);
        }

        // [6] ALERTS
        let alerts = detect_alerts(&summary, Utc::now());
        let handlers: Vec<Arc<dyn AlertHandler>> = self.alert_handlers.read().clone();
        for alert in &alerts {
            for handler in &handlers {
                handler.handle(&ctx, alert);
            }
        }
        report.alerts = alerts.len();

        crate::log_info!(
            ctx,
            "CYCLE_COMPLETE",
            settled = report.settled,
            unsettled = report.unsettled.len(),
            purged = report.purged.len(),
            alerts = report.alerts,
            duration_ms = (report.finished_at - report.started_at).num_milliseconds()
        );
        Ok(report)
    }

    /// Trust properties published for `certificate`.
    pub fn trust_properties_for(&self, certificate: &CertificateToken) -> Vec<TrustProperties> {
        self.published.load().trust_map.for_certificate(certificate).to_vec()
    }

    pub fn trust_properties_for_key(&self, key: &EntityKey) -> Vec<TrustProperties> {
        self.published.load().trust_map.get(key).to_vec()
    }

    pub fn trust_map(&self) -> Arc<TrustMap> {
        Arc::clone(&self.published.load().trust_map)
    }

    pub fn summary(&self) -> Arc<JobSummary> {
        Arc::clone(&self.published.load().summary)
    }

    /// The whole published snapshot: trust map and summary of one cycle.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.published.load_full()
    }

    /// Published state of one source.
    pub fn source_by_identifier(&self, id: &str) -> TlResult<SourceInfo> {
        self.published
            .load()
            .summary
            .source(id)
            .cloned()
            .ok_or_else(|| TlError::UnknownSource(id.to_string()))
    }
}
