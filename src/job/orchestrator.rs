//! One refresh cycle across every source.
//!
//! Coordinates the cycle workflow:
//! 1. Purge sources flagged for deletion
//! 2. Schedule LOTLs and standalone TLs, one task each
//! 3. Release each LOTL's children as soon as that LOTL settles
//! 4. Stop at the cycle deadline, leaving unsettled sources untouched
//! 5. Propagate trust over the settled store and build the summary

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use super::summary::JobSummary;
use crate::cache::{CacheStore, SourceNode};
use crate::config::{EngineConfig, SourceId, SourceKind};
use crate::logging::structured::LogContext;
use crate::pipeline::{
    candidates_for, referenced_ids, run_lotl_pipeline, run_tl_pipeline, CycleContext,
    LotlOutcome, PipelineEnv, RefreshMode,
};
use crate::trust::{TrustMap, TrustPropagator};

/// What happened during one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub mode: RefreshMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Sources whose pipeline ran to completion and was committed.
    pub settled: usize,
    /// Sources still running at the deadline or whose task failed.
    pub unsettled: Vec<SourceId>,
    pub deadline_exceeded: bool,
    pub purged: Vec<SourceId>,
    /// Derived sources no longer announced by their LOTL.
    pub unreferenced: Vec<SourceId>,
    pub certificates: usize,
    pub trust_entries: usize,
    pub alerts: usize,
}

/// Result of a cycle, ready to be published.
pub struct CycleOutcome {
    pub trust_map: TrustMap,
    pub summary: JobSummary,
    pub report: CycleReport,
}

enum PipelineOutput {
    Tl(SourceNode),
    Lotl(LotlOutcome),
}

/// Spawns pipelines and tracks what is in flight.
struct Scheduler {
    tasks: JoinSet<PipelineOutput>,
    in_flight: HashSet<SourceId>,
    scheduled: HashSet<SourceId>,
    store: Arc<CacheStore>,
    env: PipelineEnv,
    cycle: CycleContext,
}

impl Scheduler {
    fn spawn_tl(&mut self, node: SourceNode, candidates: Vec<crate::model::CertificateToken>) {
        if !self.scheduled.insert(node.id().clone()) {
            return;
        }
        self.in_flight.insert(node.id().clone());
        let ctx = self.cycle.source_context(&node.descriptor.url);
        let env = self.env.clone();
        self.tasks.spawn(async move {
            PipelineOutput::Tl(run_tl_pipeline(node, candidates, env, ctx).await)
        });
    }

    fn spawn_lotl(&mut self, node: SourceNode) {
        if !self.scheduled.insert(node.id().clone()) {
            return;
        }
        self.in_flight.insert(node.id().clone());
        let ctx = self.cycle.source_context(&node.descriptor.url);
        let env = self.env.clone();
        let store = Arc::clone(&self.store);
        self.tasks.spawn(async move {
            PipelineOutput::Lotl(run_lotl_pipeline(node, store, env, ctx).await)
        });
    }
}

pub struct JobOrchestrator<'a> {
    config: &'a EngineConfig,
    store: Arc<CacheStore>,
    env: PipelineEnv,
    cycle: CycleContext,
}

impl<'a> JobOrchestrator<'a> {
    pub fn new(
        config: &'a EngineConfig,
        store: Arc<CacheStore>,
        env: PipelineEnv,
        cycle: CycleContext,
    ) -> Self {
        Self {
            config,
            store,
            env,
            cycle,
        }
    }

    pub async fn run(self) -> CycleOutcome {
        let ctx = self.cycle.log_context();
        let started_at = self.cycle.started_at;

        crate::log_info!(
            ctx,
            "CYCLE_START",
            mode = self.cycle.mode.as_str(),
            sources = self.store.len()
        );

        // [1] PURGE
        let purged = self.store.purge();
        if !purged.is_empty() {
            crate::log_info!(
                ctx,
                "SOURCES_PURGED",
                count = purged.len(),
                ids = purged.iter().map(|id| id.as_str()).collect::<Vec<_>>()
            );
        }

        let deadline = self
            .config
            .cycle_deadline()
            .map(|d| tokio::time::Instant::now() + d);

        let mut scheduler = Scheduler {
            tasks: JoinSet::new(),
            in_flight: HashSet::new(),
            scheduled: HashSet::new(),
            store: Arc::clone(&self.store),
            env: self.env.clone(),
            cycle: self.cycle.clone(),
        };

        // [2] SCHEDULE ROOTS
        for node in self.store.snapshot() {
            if node.is_to_be_deleted() || !node.descriptor.configured {
                continue;
            }
            match node.descriptor.kind {
                SourceKind::Lotl => scheduler.spawn_lotl(node),
                SourceKind::Tl if node.descriptor.parent.is_none() => {
                    let candidates = node.descriptor.signing_certificates.clone();
                    scheduler.spawn_tl(node, candidates);
                }
                _ => {}
            }
        }

        // [3] SETTLE
        let mut settled = 0usize;
        let mut unreferenced: Vec<SourceId> = Vec::new();
        let mut deadline_exceeded = false;
        loop {
            let joined = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, scheduler.tasks.join_next()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            deadline_exceeded = true;
                            crate::log_warn!(
                                ctx,
                                "CYCLE_DEADLINE_EXCEEDED",
                                unsettled = scheduler.in_flight.len()
                            );
                            scheduler.tasks.abort_all();
                            break;
                        }
                    }
                }
                None => scheduler.tasks.join_next().await,
            };
            let joined = match joined {
                Some(joined) => joined,
                None => break,
            };

            match joined {
                Ok(PipelineOutput::Tl(node)) => {
                    scheduler.in_flight.remove(node.id());
                    self.store.commit(node);
                    settled += 1;
                }
                Ok(PipelineOutput::Lotl(outcome)) => {
                    settled += 1;
                    unreferenced.extend(self.settle_lotl(&mut scheduler, outcome, &ctx));
                }
                Err(e) => {
                    crate::log_error!(ctx, "PIPELINE_TASK_FAILED", error = e.to_string());
                }
            }
        }

        // [4] PROPAGATE
        let nodes = self.store.snapshot();
        let now = Utc::now();
        let trust_map = TrustPropagator::new(self.config.synchronization).propagate(&nodes, now, &ctx);
        let summary = JobSummary::build(&nodes, &self.cycle.cycle_id, now);

        let mut unsettled: Vec<SourceId> = scheduler.in_flight.into_iter().collect();
        unsettled.sort();

        let report = CycleReport {
            cycle_id: self.cycle.cycle_id.clone(),
            mode: self.cycle.mode,
            started_at,
            finished_at: Utc::now(),
            settled,
            unsettled,
            deadline_exceeded,
            purged,
            unreferenced,
            certificates: trust_map.len(),
            trust_entries: trust_map.entry_count(),
            alerts: 0,
        };

        CycleOutcome {
            trust_map,
            summary,
            report,
        }
    }

    /// Commit a LOTL and its pivots, then release its children.
    fn settle_lotl(
        &self,
        scheduler: &mut Scheduler,
        outcome: LotlOutcome,
        ctx: &LogContext,
    ) -> Vec<SourceId> {
        let lotl_id = outcome.node.id().clone();
        let lotl_ctx = ctx.with_source(lotl_id.as_str());
        let referenced = referenced_ids(&outcome);
        let last_valid = outcome.node.last_valid_parsing().cloned();

        for pivot in outcome.pivots {
            self.store.commit(pivot);
        }
        self.store.commit(outcome.node);
        scheduler.in_flight.remove(&lotl_id);

        let mut children: Vec<SourceId> = Vec::new();
        for descriptor in outcome.derived {
            let id = descriptor.id.clone();
            if self.store.ensure_derived(descriptor) {
                children.push(id);
            } else {
                crate::log_debug!(lotl_ctx, "DERIVED_URL_OVERRIDDEN", url = id.as_str());
            }
        }
        for source in &self.config.sources {
            if source.parent.as_deref() == Some(lotl_id.as_str()) {
                let id = SourceId::new(&source.url);
                if !children.contains(&id) {
                    children.push(id);
                }
            }
        }

        let unreferenced = self.store.mark_unreferenced(&lotl_id, &referenced);
        if !unreferenced.is_empty() {
            crate::log_info!(
                lotl_ctx,
                "SOURCES_UNREFERENCED",
                count = unreferenced.len(),
                ids = unreferenced.iter().map(|id| id.as_str()).collect::<Vec<_>>()
            );
        }

        let mut released = 0usize;
        for id in children {
            let node = match self.store.get(&id) {
                Some(node) if !node.is_to_be_deleted() => node,
                _ => continue,
            };
            let candidates = candidates_for(last_valid.as_ref(), &node.descriptor.url);
            scheduler.spawn_tl(node, candidates);
            released += 1;
        }
        crate::log_debug!(lotl_ctx, "CHILDREN_RELEASED", count = released);

        unreferenced
    }
}
