//! Change and error detection over a job summary.

use chrono::{DateTime, Utc};

use super::Alert;
use crate::cache::CacheStatus;
use crate::job::{JobSummary, LotlSummary, SourceInfo};
use crate::validation::SignatureVerdict;

/// Every alert raised by `summary`, in summary order.
pub fn detect_alerts(summary: &JobSummary, now: DateTime<Utc>) -> Vec<Alert> {
    let mut alerts = Vec::new();
    for lotl in &summary.lotls {
        source_alerts(&lotl.info, now, &mut alerts);
        lotl_alerts(lotl, &mut alerts);
        for child in &lotl.children {
            source_alerts(child, now, &mut alerts);
        }
    }
    for tl in &summary.other_tls {
        source_alerts(tl, now, &mut alerts);
    }
    alerts
}

fn source_alerts(info: &SourceInfo, now: DateTime<Utc>, alerts: &mut Vec<Alert>) {
    if info.download.status == CacheStatus::Error {
        alerts.push(Alert::TlDownloadError {
            source: info.id.clone(),
            message: error_message(&info.download.error),
        });
    }
    if info.parsing.status == CacheStatus::Error {
        alerts.push(Alert::TlParsingError {
            source: info.id.clone(),
            message: error_message(&info.parsing.error),
        });
    }
    match info.verdict() {
        Some(verdict) if verdict != SignatureVerdict::Valid => alerts.push(Alert::TlSignatureError {
            source: info.id.clone(),
            verdict,
            reason: info
                .validation_outcome
                .as_ref()
                .and_then(|v| v.check.reason.clone()),
        }),
        _ => {}
    }
    if info.is_expired(now) {
        if let Some(next_update) = info.parsing_result.as_ref().and_then(|r| r.next_update) {
            alerts.push(Alert::TlExpired {
                source: info.id.clone(),
                next_update,
            });
        }
    }
}

fn lotl_alerts(lotl: &LotlSummary, alerts: &mut Vec<Alert>) {
    let expected_location = lotl
        .expected_lotl_location
        .clone()
        .unwrap_or_else(|| lotl.info.url.clone());

    for info in std::iter::once(&lotl.info).chain(lotl.pivots.iter().map(|p| &p.info)) {
        let result = match &info.parsing_result {
            Some(result) => result,
            None => continue,
        };
        let pointers = result.lotl_pointers();
        if !pointers.is_empty() && !pointers.iter().any(|p| p.location == expected_location) {
            alerts.push(Alert::LotlLocationChange {
                source: info.id.clone(),
                expected: expected_location.clone(),
                found: pointers[0].location.clone(),
            });
        }
    }

    if let (Some(expected), Some(result)) =
        (&lotl.expected_announcement_url, &lotl.info.parsing_result)
    {
        let found = result.signing_certificate_announcement_url();
        if found != Some(expected.as_str()) {
            alerts.push(Alert::AnnouncementUrlChange {
                source: lotl.info.id.clone(),
                expected: expected.clone(),
                found: found.map(str::to_string),
            });
        }
    }
}

fn error_message(error: &Option<crate::error::CapturedError>) -> String {
    error
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_default()
}
