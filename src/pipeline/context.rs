//! Pipeline context management.
//!
//! Provides cycle and source context for logging and state tracking.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logging::structured::LogContext;

/// Which fetch adapter a cycle runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    Online,
    Offline,
}

impl RefreshMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshMode::Online => "online",
            RefreshMode::Offline => "offline",
        }
    }
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context for one refresh cycle.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub mode: RefreshMode,
}

impl CycleContext {
    pub fn new(mode: RefreshMode) -> Self {
        let cycle_id = format!("cycle-{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            cycle_id,
            started_at: Utc::now(),
            mode,
        }
    }

    pub fn log_context(&self) -> LogContext {
        LogContext::new(&self.cycle_id)
    }

    /// Create a source context for this cycle.
    pub fn source_context(&self, url: &str) -> LogContext {
        self.log_context().with_source(url)
    }
}
