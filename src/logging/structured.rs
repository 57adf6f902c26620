//! Structured logging utilities.
//!
//! Provides context-aware logging with cycle_id and the source url included
//! in every log message.

use std::fmt;

/// Logging context for one refresh cycle.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub cycle_id: String,
    pub source: Option<String>,
}

impl LogContext {
    pub fn new(cycle_id: &str) -> Self {
        Self {
            cycle_id: cycle_id.to_string(),
            source: None,
        }
    }

    pub fn with_source(&self, source: &str) -> Self {
        Self {
            cycle_id: self.cycle_id.clone(),
            source: Some(source.to_string()),
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "[cycle={}] [source={}]", self.cycle_id, src),
            None => write!(f, "[cycle={}]", self.cycle_id),
        }
    }
}

/// Log an info message with context.
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::info!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={:?} "),*), $($value),*)
        );
    };
}

/// Log a warning message with context.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::warn!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={:?} "),*), $($value),*)
        );
    };
}

/// Log an error message with context.
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::error!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={:?} "),*), $($value),*)
        );
    };
}

/// Log a debug message with context.
#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::debug!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={:?} "),*), $($value),*)
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_display() {
        let ctx = LogContext::new("cycle-123");
        assert_eq!(format!("{}", ctx), "[cycle=cycle-123]");

        let ctx_with_source = ctx.with_source("https://example.org/tl.json");
        assert_eq!(
            format!("{}", ctx_with_source),
            "[cycle=cycle-123] [source=https://example.org/tl.json]"
        );
    }

    #[test]
    fn test_macros_accept_key_values() {
        let ctx = LogContext::new("cycle-1");
        crate::log_info!(ctx, "TEST_EVENT", count = 3, name = "x");
        crate::log_debug!(ctx, "TEST_EVENT", flag = true);
    }
}
