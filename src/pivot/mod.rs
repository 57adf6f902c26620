//! Pivot chain processing.
//!
//! - Walks LOTL pivots from the configured roots to the live signer set
//! - Records, per pivot, what happened to every certificate it touched

pub mod chain;
pub mod status;

pub use chain::*;
pub use status::*;
