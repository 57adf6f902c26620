//! Which validated sources are folded into the trust map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ParsingResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynchronizationStrategy {
    /// Keep TLs whose next update date has passed.
    pub include_expired: bool,
}

impl Default for SynchronizationStrategy {
    fn default() -> Self {
        Self {
            include_expired: true,
        }
    }
}

impl SynchronizationStrategy {
    pub fn accepts(&self, result: &ParsingResult, now: DateTime<Utc>) -> bool {
        self.include_expired || !result.is_expired(now)
    }
}
