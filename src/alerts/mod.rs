//! Alerts raised after each cycle.
//!
//! - `Alert` kinds for source errors, expiry and LOTL location or
//!   announcement changes
//! - `AlertHandler` trait and a logging handler
//! - Detection over the published job summary

pub mod detection;

pub use detection::*;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::SourceId;
use crate::logging::structured::LogContext;
use crate::validation::SignatureVerdict;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Alert {
    TlSignatureError {
        source: SourceId,
        verdict: SignatureVerdict,
        reason: Option<String>,
    },
    TlParsingError {
        source: SourceId,
        message: String,
    },
    TlDownloadError {
        source: SourceId,
        message: String,
    },
    TlExpired {
        source: SourceId,
        next_update: DateTime<Utc>,
    },
    LotlLocationChange {
        source: SourceId,
        expected: String,
        found: String,
    },
    AnnouncementUrlChange {
        source: SourceId,
        expected: String,
        found: Option<String>,
    },
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::TlSignatureError { .. } => "TL_SIGNATURE_ERROR",
            Alert::TlParsingError { .. } => "TL_PARSING_ERROR",
            Alert::TlDownloadError { .. } => "TL_DOWNLOAD_ERROR",
            Alert::TlExpired { .. } => "TL_EXPIRED",
            Alert::LotlLocationChange { .. } => "LOTL_LOCATION_CHANGE",
            Alert::AnnouncementUrlChange { .. } => "ANNOUNCEMENT_URL_CHANGE",
        }
    }

    pub fn source(&self) -> &SourceId {
        match self {
            Alert::TlSignatureError { source, .. }
            | Alert::TlParsingError { source, .. }
            | Alert::TlDownloadError { source, .. }
            | Alert::TlExpired { source, .. }
            | Alert::LotlLocationChange { source, .. }
            | Alert::AnnouncementUrlChange { source, .. } => source,
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::TlSignatureError {
                verdict, reason, ..
            } => write!(
                f,
                "signature verdict {} ({})",
                verdict,
                reason.as_deref().unwrap_or("no reason")
            ),
            Alert::TlParsingError { message, .. } | Alert::TlDownloadError { message, .. } => {
                f.write_str(message)
            }
            Alert::TlExpired { next_update, .. } => {
                write!(f, "next update was due {}", next_update.to_rfc3339())
            }
            Alert::LotlLocationChange {
                expected, found, ..
            } => write!(f, "LOTL location {} differs from expected {}", found, expected),
            Alert::AnnouncementUrlChange {
                expected, found, ..
            } => write!(
                f,
                "announcement url {} differs from expected {}",
                found.as_deref().unwrap_or("<none>"),
                expected
            ),
        }
    }
}

/// Receives the alerts of every cycle.
pub trait AlertHandler: Send + Sync {
    fn handle(&self, ctx: &LogContext, alert: &Alert);
}

/// Logs each alert as `ALERT_<KIND>` at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertHandler;

impl AlertHandler for LogAlertHandler {
    fn handle(&self, ctx: &LogContext, alert: &Alert) {
        let ctx = ctx.with_source(alert.source().as_str());
        log::warn!("{} ALERT_{} detail={:?}", ctx, alert.kind(), alert.to_string());
    }
}
