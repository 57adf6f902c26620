//! Folds validated TL content into a fresh trust map.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::map::{TrustMap, TrustProperties};
use super::strategy::SynchronizationStrategy;
use crate::cache::SourceNode;
use crate::config::SourceKind;
use crate::logging::structured::LogContext;

#[derive(Debug, Clone, Default)]
pub struct TrustPropagator {
    strategy: SynchronizationStrategy,
}

impl TrustPropagator {
    pub fn new(strategy: SynchronizationStrategy) -> Self {
        Self { strategy }
    }

    /// Whether `node` contributes to the trust map.
    pub fn is_eligible(&self, node: &SourceNode, now: DateTime<Utc>) -> bool {
        node.descriptor.kind == SourceKind::Tl
            && !node.is_to_be_deleted()
            && node.is_trusted()
            && node
                .parsing_result()
                .map_or(false, |result| self.strategy.accepts(result, now))
    }

    /// Build a new map from every eligible node. The input is never mutated.
    pub fn propagate(&self, nodes: &[SourceNode], now: DateTime<Utc>, ctx: &LogContext) -> TrustMap {
        let mut map = TrustMap::new();
        let mut contributing = 0usize;

        for node in nodes {
            if !self.is_eligible(node, now) {
                continue;
            }
            let result = match node.parsing_result() {
                Some(result) => result,
                None => continue,
            };
            contributing += 1;

            let lotl_url = node.descriptor.parent.as_ref().map(|p| p.to_string());
            for provider in result.providers() {
                for service in &provider.services {
                    for certificate in &service.certificates {
                        map.insert(TrustProperties {
                            certificate: certificate.clone(),
                            tl_url: node.descriptor.url.clone(),
                            lotl_url: lotl_url.clone(),
                            provider: Arc::clone(provider),
                            service: Arc::clone(service),
                        });
                    }
                }
            }
        }

        crate::log_info!(
            ctx,
            "TRUST_MAP_BUILT",
            sources = contributing,
            certificates = map.len(),
            entries = map.entry_count()
        );
        map
    }
}
