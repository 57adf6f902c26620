//! Per-stage cache records and their status machine.
//!
//! A record keeps the last successful result of one stage together with
//! the fingerprint of the input it was computed from. Failures only touch
//! status and captured error; the previous result stays readable.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CapturedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    RefreshNeeded,
    Synchronized,
    Desynchronized,
    Error,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::RefreshNeeded => "REFRESH_NEEDED",
            CacheStatus::Synchronized => "SYNCHRONIZED",
            CacheStatus::Desynchronized => "DESYNCHRONIZED",
            CacheStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached outcome of one stage of one source.
#[derive(Debug)]
pub struct CacheRecord<T> {
    result: Option<Arc<T>>,
    status: CacheStatus,
    to_be_deleted: bool,
    last_success: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    last_state_transition: Option<DateTime<Utc>>,
    error: Option<CapturedError>,
    /// Fingerprint of the input `result` was computed from.
    fingerprint: Option<String>,
}

// manual impl: `T` itself need not be Clone behind the Arc
impl<T> Clone for CacheRecord<T> {
    fn clone(&self) -> Self {
        Self {
            result: self.result.clone(),
            status: self.status,
            to_be_deleted: self.to_be_deleted,
            last_success: self.last_success,
            last_attempt: self.last_attempt,
            last_state_transition: self.last_state_transition,
            error: self.error.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

impl<T> Default for CacheRecord<T> {
    fn default() -> Self {
        Self {
            result: None,
            status: CacheStatus::RefreshNeeded,
            to_be_deleted: false,
            last_success: None,
            last_attempt: None,
            last_state_transition: None,
            error: None,
            fingerprint: None,
        }
    }
}

impl<T> CacheRecord<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self) -> Option<&Arc<T>> {
        self.result.as_ref()
    }

    pub fn status(&self) -> CacheStatus {
        self.status
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn error(&self) -> Option<&CapturedError> {
        self.error.as_ref()
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }

    pub fn last_state_transition(&self) -> Option<DateTime<Utc>> {
        self.last_state_transition
    }

    pub fn is_to_be_deleted(&self) -> bool {
        self.to_be_deleted
    }

    pub fn is_synchronized(&self) -> bool {
        self.status == CacheStatus::Synchronized
    }

    /// True when the cached result is current for `input_fingerprint`.
    pub fn is_fresh_for(&self, input_fingerprint: &str) -> bool {
        self.status == CacheStatus::Synchronized
            && self.fingerprint.as_deref() == Some(input_fingerprint)
    }

    fn set_status(&mut self, status: CacheStatus, now: DateTime<Utc>) {
        if self.status != status {
            self.status = status;
            self.last_state_transition = Some(now);
        }
    }

    /// Input changed since the result was computed.
    pub fn desynchronize(&mut self, now: DateTime<Utc>) {
        self.set_status(CacheStatus::Desynchronized, now);
    }

    /// Force recomputation on the next cycle regardless of fingerprints.
    pub fn refresh_needed(&mut self, now: DateTime<Utc>) {
        self.set_status(CacheStatus::RefreshNeeded, now);
    }

    /// Store a freshly computed result for `input_fingerprint`.
    pub fn succeed(&mut self, result: T, input_fingerprint: &str, now: DateTime<Utc>) {
        self.result = Some(Arc::new(result));
        self.fingerprint = Some(input_fingerprint.to_string());
        self.error = None;
        self.last_attempt = Some(now);
        self.last_success = Some(now);
        self.set_status(CacheStatus::Synchronized, now);
    }

    /// The stage ran and found its cached result still current.
    pub fn confirm(&mut self, now: DateTime<Utc>) {
        self.error = None;
        self.last_attempt = Some(now);
        self.last_success = Some(now);
        self.set_status(CacheStatus::Synchronized, now);
    }

    /// Record a failure; the previous result is kept.
    pub fn fail(&mut self, error: CapturedError, now: DateTime<Utc>) {
        self.error = Some(error);
        self.last_attempt = Some(now);
        self.set_status(CacheStatus::Error, now);
    }

    pub fn mark_to_be_deleted(&mut self, flag: bool) {
        self.to_be_deleted = flag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_initial_state() {
        let record: CacheRecord<String> = CacheRecord::new();
        assert_eq!(record.status(), CacheStatus::RefreshNeeded);
        assert!(record.result().is_none());
        assert!(!record.is_fresh_for("abc"));
    }

    #[test]
    fn test_success_then_unchanged_input_is_fresh() {
        let now = Utc::now();
        let mut record = CacheRecord::new();
        record.succeed("parsed".to_string(), "fp-1", now);

        assert!(record.is_fresh_for("fp-1"));
        assert!(!record.is_fresh_for("fp-2"));
        assert_eq!(record.last_success(), Some(now));
        assert_eq!(record.last_state_transition(), Some(now));
    }

    #[test]
    fn test_failure_keeps_previous_result() {
        let now = Utc::now();
        let mut record = CacheRecord::new();
        record.succeed(7u32, "fp-1", now);

        let later = now + Duration::minutes(5);
        record.desynchronize(later);
        record.fail(CapturedError::new("boom", "Parse(\"boom\")"), later);

        assert_eq!(record.status(), CacheStatus::Error);
        assert_eq!(record.result().map(|r| **r), Some(7));
        assert_eq!(record.fingerprint(), Some("fp-1"));
        assert_eq!(record.last_success(), Some(now));
        assert_eq!(record.last_attempt(), Some(later));
        assert!(!record.is_fresh_for("fp-1"));
    }

    #[test]
    fn test_confirm_clears_error() {
        let now = Utc::now();
        let mut record = CacheRecord::new();
        record.succeed(1u8, "fp", now);
        record.fail(CapturedError::new("timeout", "FetchTimeout(30)"), now);
        record.confirm(now);
        assert!(record.is_fresh_for("fp"));
        assert!(record.error().is_none());
    }

    #[test]
    fn test_transition_time_only_moves_on_change() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);
        let mut record = CacheRecord::new();
        record.succeed(1u8, "fp", t0);
        record.confirm(t1);
        assert_eq!(record.last_state_transition(), Some(t0));
        assert_eq!(record.last_attempt(), Some(t1));
    }
}
