//! Parsing stage: downloaded bytes to `ParsingResult`.
//!
//! Trusted lists keep providers accepted by the provider predicate, then
//! services accepted by the service predicate; providers left without
//! services are dropped. Lists of lists split their pointers and pick out
//! pivot urls and the signing certificate announcement.

use std::sync::Arc;

use serde_json::Value;

use super::document::{RawDocument, RawPointer, RawProvider, RawService};
use crate::config::{ResourceLimits, SourceDescriptor, SourceKind};
use crate::error::{TlError, TlResult};
use crate::logging::structured::LogContext;
use crate::model::{
    CertificateToken, ConditionForQualifiers, ListContent, OtherTslPointer, ParsingResult,
    ServiceStatusEntry, TimeDependentValues, TrustService, TrustServiceProvider,
};
use crate::validation::StructureVerifier;

/// Parses one source document with that source's predicates.
pub struct ParsingTask<'a> {
    descriptor: &'a SourceDescriptor,
    limits: &'a ResourceLimits,
    structure: &'a StructureVerifier,
    ctx: &'a LogContext,
}

fn check_limit(what: &'static str, actual: usize, limit: usize) -> TlResult<()> {
    if actual > limit {
        return Err(TlError::ResourceExhausted {
            what,
            actual,
            limit,
        });
    }
    Ok(())
}

impl<'a> ParsingTask<'a> {
    pub fn new(
        descriptor: &'a SourceDescriptor,
        limits: &'a ResourceLimits,
        structure: &'a StructureVerifier,
        ctx: &'a LogContext,
    ) -> Self {
        Self {
            descriptor,
            limits,
            structure,
            ctx,
        }
    }

    pub fn run(&self, bytes: &[u8]) -> TlResult<ParsingResult> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| TlError::Parse(format!("Malformed document: {}", e)))?;

        let structure_violations = self.structure.verify(&value, self.ctx);

        let raw: RawDocument = serde_json::from_value(value)
            .map_err(|e| TlError::Parse(format!("Unexpected document structure: {}", e)))?;

        self.check_limits(&raw)?;

        let content = match self.descriptor.kind {
            SourceKind::Tl => ListContent::TrustedList {
                providers: self.build_providers(&raw.providers)?,
            },
            SourceKind::Lotl | SourceKind::Pivot => self.build_list_of_lists(&raw)?,
        };

        let scheme = raw.scheme;
        Ok(ParsingResult {
            tsl_type: scheme.tsl_type,
            sequence_number: scheme.sequence_number,
            version: scheme.version,
            territory: scheme.territory,
            issue_date: scheme.issue_date,
            next_update: scheme.next_update,
            distribution_points: scheme.distribution_points,
            content,
            structure_violations,
        })
    }

    fn check_limits(&self, raw: &RawDocument) -> TlResult<()> {
        let limits = self.limits;
        check_limit("provider count", raw.providers.len(), limits.max_providers)?;
        let services: usize = raw.providers.iter().map(|p| p.services.len()).sum();
        check_limit("service count", services, limits.max_services)?;
        check_limit("pointer count", raw.scheme.pointers.len(), limits.max_pointers)?;
        check_limit(
            "scheme information uri count",
            raw.scheme.scheme_information_uris.len(),
            limits.max_pivots + limits.max_pointers,
        )?;

        let per_entry = raw
            .providers
            .iter()
            .flat_map(|p| p.services.iter().map(|s| s.certificates.len()))
            .chain(raw.scheme.pointers.iter().map(|p| p.certificates.len()))
            .max()
            .unwrap_or(0);
        check_limit(
            "certificates per entry",
            per_entry,
            limits.max_certificates_per_entry,
        )
    }

    fn build_providers(&self, raw: &[RawProvider]) -> TlResult<Vec<Arc<TrustServiceProvider>>> {
        let filters = &self.descriptor.filters;
        let mut providers = Vec::new();
        let mut dropped = 0usize;

        for raw_provider in raw {
            let services = raw_provider
                .services
                .iter()
                .map(build_service)
                .collect::<TlResult<Vec<_>>>()?;

            let mut provider = TrustServiceProvider {
                names: raw_provider.names.clone(),
                trade_names: raw_provider.trade_names.clone(),
                registration_identifiers: raw_provider.registration_identifiers.clone(),
                territory: raw_provider.territory.clone(),
                electronic_addresses: raw_provider.electronic_addresses.clone(),
                services: services.into_iter().map(Arc::new).collect(),
            };

            if !filters.provider.test(&provider) {
                dropped += 1;
                continue;
            }

            provider.services.retain(|s| filters.service.test(s));
            if provider.services.is_empty() {
                dropped += 1;
                continue;
            }
            providers.push(Arc::new(provider));
        }

        crate::log_debug!(
            self.ctx,
            "PARSING_PROVIDERS_FILTERED",
            kept = providers.len(),
            dropped = dropped,
            provider_filter = filters.provider.label(),
            service_filter = filters.service.label()
        );
        Ok(providers)
    }

    fn build_list_of_lists(&self, raw: &RawDocument) -> TlResult<ListContent> {
        let filters = &self.descriptor.filters;
        let pointers = raw
            .scheme
            .pointers
            .iter()
            .map(build_pointer)
            .collect::<TlResult<Vec<_>>>()?;

        let lotl_pointers: Vec<OtherTslPointer> = pointers
            .iter()
            .filter(|p| filters.lotl_pointer.test(p))
            .cloned()
            .collect();
        let tl_pointers: Vec<OtherTslPointer> = pointers
            .into_iter()
            .filter(|p| filters.tl_pointer.test(p))
            .collect();

        let uris = &raw.scheme.scheme_information_uris;
        let pivot_urls: Vec<String> = uris
            .iter()
            .filter(|u| filters.pivot_url.test(u.as_str()))
            .cloned()
            .collect();
        check_limit("pivot count", pivot_urls.len(), self.limits.max_pivots)?;

        let announcements: Vec<&String> = uris
            .iter()
            .filter(|u| filters.announcement_url.test(u.as_str()))
            .collect();
        if announcements.len() > 1 {
            crate::log_warn!(
                self.ctx,
                "ANNOUNCEMENT_URL_AMBIGUOUS",
                found = announcements.len(),
                used = announcements[0]
            );
        }

        Ok(ListContent::ListOfLists {
            lotl_pointers,
            tl_pointers,
            pivot_urls,
            signing_certificate_announcement_url: announcements.first().map(|u| u.to_string()),
        })
    }
}

fn decode_certificates(encoded: &[String]) -> TlResult<Vec<CertificateToken>> {
    encoded
        .iter()
        .map(|c| CertificateToken::from_base64(c))
        .collect()
}

fn build_service(raw: &RawService) -> TlResult<TrustService> {
    let changes = raw
        .history
        .iter()
        .map(|entry| {
            let status = ServiceStatusEntry {
                names: entry.names.clone(),
                service_type: entry.service_type.clone(),
                status: entry.status.clone(),
                conditions_for_qualifiers: entry
                    .qualifiers
                    .iter()
                    .map(|q| ConditionForQualifiers {
                        qualifiers: q.qualifiers.clone(),
                        criteria: q.criteria.clone(),
                    })
                    .collect(),
                additional_service_info_uris: entry.additional_info.clone(),
                service_supply_points: entry.supply_points.clone(),
                expired_certs_revocation_info: entry.expired_certs_revocation_info,
            };
            (entry.start, status)
        })
        .collect();

    Ok(TrustService {
        certificates: decode_certificates(&raw.certificates)?,
        history: TimeDependentValues::from_changes(changes)?,
    })
}

fn build_pointer(raw: &RawPointer) -> TlResult<OtherTslPointer> {
    Ok(OtherTslPointer {
        location: raw.location.clone(),
        territory: raw.territory.clone(),
        tsl_type: raw.tsl_type.clone(),
        mime_type: raw.mime_type.clone(),
        certificates: decode_certificates(&raw.certificates)?,
    })
}
