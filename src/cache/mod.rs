//! Three-stage cache.
//!
//! - Cache records and the status state machine
//! - Source nodes (TL, LOTL, pivot) holding one record per stage
//! - The keyed store the orchestrator reads from and commits to

pub mod node;
pub mod record;
pub mod store;

pub use node::*;
pub use record::*;
pub use store::*;
