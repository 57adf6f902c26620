//! Refresh jobs.
//!
//! - `JobOrchestrator` driving one cycle over every source
//! - `JobSummary` read-only view of the settled cache
//! - `TrustListEngine` facade holding the store and the published snapshot

pub mod engine;
pub mod orchestrator;
pub mod summary;

pub use engine::*;
pub use orchestrator::*;
pub use summary::*;
