//! Filter predicates applied while parsing.
//!
//! Predicates are plain function values with a label for logging. The
//! declarative `FilterSpec` found in configuration compiles into them;
//! callers embedding the engine may also build predicates directly.

use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{TlError, TlResult};
use crate::model::{uri, OtherTslPointer, TrustService, TrustServiceProvider};

lazy_static! {
    /// Scheme information URIs that point to a pivot LOTL.
    static ref DEFAULT_PIVOT_PATTERN: Regex = Regex::new(r"(?i)pivot").unwrap();

    /// Official Journal publications announcing the LOTL signing certificates.
    static ref DEFAULT_ANNOUNCEMENT_PATTERN: Regex =
        Regex::new(r"(?i)^https?://eur-lex\.europa\.eu/").unwrap();
}

/// Labelled predicate over `T`.
pub struct Predicate<T: ?Sized> {
    label: String,
    test: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: ?Sized> Predicate<T> {
    pub fn new<F>(label: &str, test: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.to_string(),
            test: Arc::new(test),
        }
    }

    pub fn accept_all() -> Self {
        Self::new("accept_all", |_| true)
    }

    pub fn test(&self, value: &T) -> bool {
        (self.test)(value)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<T: ?Sized> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            test: Arc::clone(&self.test),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({})", self.label)
    }
}

/// Compiled predicates for one source.
#[derive(Debug, Clone)]
pub struct SourceFilters {
    pub provider: Predicate<TrustServiceProvider>,
    pub service: Predicate<TrustService>,
    pub lotl_pointer: Predicate<OtherTslPointer>,
    pub tl_pointer: Predicate<OtherTslPointer>,
    pub pivot_url: Predicate<str>,
    pub announcement_url: Predicate<str>,
}

impl Default for SourceFilters {
    fn default() -> Self {
        Self {
            provider: Predicate::accept_all(),
            service: Predicate::accept_all(),
            lotl_pointer: tsl_type_predicate(uri::TSL_TYPE_EU_LOTL),
            tl_pointer: tsl_type_predicate(uri::TSL_TYPE_EU_GENERIC),
            pivot_url: Predicate::new("pivot_url_default", |url: &str| {
                DEFAULT_PIVOT_PATTERN.is_match(url)
            }),
            announcement_url: Predicate::new("official_journal_default", |url: &str| {
                DEFAULT_ANNOUNCEMENT_PATTERN.is_match(url)
            }),
        }
    }
}

fn tsl_type_predicate(tsl_type: &str) -> Predicate<OtherTslPointer> {
    let expected = tsl_type.to_string();
    Predicate::new(&format!("tsl_type={}", tsl_type), move |p: &OtherTslPointer| {
        p.tsl_type.as_deref() == Some(expected.as_str())
    })
}

fn compile_pattern(pattern: &str) -> TlResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| TlError::Config(format!("Invalid pattern '{}': {}", pattern, e)))
}

/// Declarative filter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    /// Keep providers from these territories only.
    pub provider_territories: Option<Vec<String>>,
    /// Keep providers whose name contains one of these substrings.
    pub provider_names: Option<Vec<String>>,
    /// Keep services that have one of these types in their history.
    pub service_types: Option<Vec<String>>,
    /// Keep services that are or were granted.
    pub granted_only: bool,
    /// Select the LOTL pointer by location instead of TSL type.
    pub lotl_pointer_location: Option<String>,
    pub lotl_pointer_type: Option<String>,
    pub tl_pointer_type: Option<String>,
    /// Keep TL pointers for these territories only.
    pub tl_territories: Option<Vec<String>>,
    pub pivot_url_pattern: Option<String>,
    /// Exact Official Journal URL announcing the signing certificates.
    pub announcement_url: Option<String>,
    pub announcement_url_pattern: Option<String>,
}

impl FilterSpec {
    pub fn compile(&self) -> TlResult<SourceFilters> {
        let mut filters = SourceFilters::default();

        if self.provider_territories.is_some() || self.provider_names.is_some() {
            let territories = self.provider_territories.clone();
            let names = self.provider_names.clone();
            filters.provider = Predicate::new(
                "provider_spec",
                move |tsp: &TrustServiceProvider| {
                    let territory_ok = territories.as_ref().map_or(true, |allowed| {
                        tsp.territory
                            .as_ref()
                            .map_or(false, |t| allowed.iter().any(|a| a.eq_ignore_ascii_case(t)))
                    });
                    let name_ok = names.as_ref().map_or(true, |allowed| {
                        tsp.names
                            .values()
                            .flatten()
                            .chain(tsp.trade_names.values().flatten())
                            .any(|n| allowed.iter().any(|a| n.contains(a.as_str())))
                    });
                    territory_ok && name_ok
                },
            );
        }

        if self.service_types.is_some() || self.granted_only {
            let types = self.service_types.clone();
            let granted_only = self.granted_only;
            filters.service = Predicate::new("service_spec", move |service: &TrustService| {
                let entries = service.history.entries();
                let type_ok = types.as_ref().map_or(true, |allowed| {
                    entries
                        .iter()
                        .any(|e| allowed.iter().any(|a| a == &e.value.service_type))
                });
                let granted_ok = !granted_only || entries.iter().any(|e| e.value.is_granted());
                type_ok && granted_ok
            });
        }

        if let Some(location) = &self.lotl_pointer_location {
            let location = location.clone();
            filters.lotl_pointer = Predicate::new(
                &format!("lotl_location={}", location),
                move |p: &OtherTslPointer| p.location == location,
            );
        } else if let Some(tsl_type) = &self.lotl_pointer_type {
            filters.lotl_pointer = tsl_type_predicate(tsl_type);
        }

        if self.tl_pointer_type.is_some() || self.tl_territories.is_some() {
            let tsl_type = self
                .tl_pointer_type
                .clone()
                .unwrap_or_else(|| uri::TSL_TYPE_EU_GENERIC.to_string());
            let territories = self.tl_territories.clone();
            filters.tl_pointer = Predicate::new("tl_pointer_spec", move |p: &OtherTslPointer| {
                let type_ok = p.tsl_type.as_deref() == Some(tsl_type.as_str());
                let territory_ok = territories.as_ref().map_or(true, |allowed| {
                    p.territory
                        .as_ref()
                        .map_or(false, |t| allowed.iter().any(|a| a.eq_ignore_ascii_case(t)))
                });
                type_ok && territory_ok
            });
        }

        if let Some(pattern) = &self.pivot_url_pattern {
            let re = compile_pattern(pattern)?;
            filters.pivot_url = Predicate::new(pattern, move |url: &str| re.is_match(url));
        }

        if let Some(url) = &self.announcement_url {
            let url = url.clone();
            filters.announcement_url =
                Predicate::new(&format!("announcement={}", url), move |candidate: &str| {
                    candidate == url
                });
        } else if let Some(pattern) = &self.announcement_url_pattern {
            let re = compile_pattern(pattern)?;
            filters.announcement_url = Predicate::new(pattern, move |url: &str| re.is_match(url));
        }

        Ok(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServiceStatusEntry, TimeDependentValues};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn provider(territory: &str, name: &str) -> TrustServiceProvider {
        let mut names = BTreeMap::new();
        names.insert("en".to_string(), vec![name.to_string()]);
        TrustServiceProvider {
            names,
            trade_names: BTreeMap::new(),
            registration_identifiers: vec![],
            territory: Some(territory.to_string()),
            electronic_addresses: BTreeMap::new(),
            services: vec![],
        }
    }

    fn service(statuses: &[&str]) -> TrustService {
        let changes = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                (
                    Utc.with_ymd_and_hms(2015 + i as i32, 1, 1, 0, 0, 0).unwrap(),
                    ServiceStatusEntry {
                        names: BTreeMap::new(),
                        service_type: uri::SERVICE_TYPE_CA_QC.to_string(),
                        status: status.to_string(),
                        conditions_for_qualifiers: vec![],
                        additional_service_info_uris: vec![],
                        service_supply_points: vec![],
                        expired_certs_revocation_info: None,
                    },
                )
            })
            .collect();
        TrustService {
            certificates: vec![],
            history: TimeDependentValues::from_changes(changes).unwrap(),
        }
    }

    #[test]
    fn test_default_filters() {
        let filters = SourceFilters::default();
        assert!(filters.provider.test(&provider("BE", "Any")));
        assert!(filters
            .pivot_url
            .test("https://ec.europa.eu/tools/lotl/eu-lotl-pivot-300.xml"));
        assert!(!filters.pivot_url.test("https://ec.europa.eu/tools/lotl/eu-lotl.xml"));
        assert!(filters.announcement_url.test(
            "https://eur-lex.europa.eu/legal-content/EN/TXT/?uri=uriserv:OJ.C_.2019.276.01.0001.01.ENG"
        ));
    }

    #[test]
    fn test_provider_territory_filter() {
        let spec = FilterSpec {
            provider_territories: Some(vec!["cz".to_string()]),
            ..Default::default()
        };
        let filters = spec.compile().unwrap();
        assert!(filters.provider.test(&provider("CZ", "Postsignum")));
        assert!(!filters.provider.test(&provider("BE", "Certipost")));
    }

    #[test]
    fn test_granted_only_keeps_previously_granted() {
        let spec = FilterSpec {
            granted_only: true,
            ..Default::default()
        };
        let filters = spec.compile().unwrap();
        assert!(filters
            .service
            .test(&service(&[uri::STATUS_GRANTED, uri::STATUS_WITHDRAWN])));
        assert!(!filters.service.test(&service(&[uri::STATUS_WITHDRAWN])));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let spec = FilterSpec {
            pivot_url_pattern: Some("(".to_string()),
            ..Default::default()
        };
        assert!(matches!(spec.compile(), Err(TlError::Config(_))));
    }

    #[test]
    fn test_exact_announcement_url() {
        let spec = FilterSpec {
            announcement_url: Some("https://eur-lex.europa.eu/oj-1".to_string()),
            ..Default::default()
        };
        let filters = spec.compile().unwrap();
        assert!(filters.announcement_url.test("https://eur-lex.europa.eu/oj-1"));
        assert!(!filters.announcement_url.test("https://eur-lex.europa.eu/oj-2"));
        assert_eq!(filters.announcement_url.label(), "announcement=https://eur-lex.europa.eu/oj-1");
    }
}
