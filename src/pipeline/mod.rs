//! Pipeline orchestration module.
//!
//! Per-source refresh pipeline that coordinates:
//! - Download with per-source timeout
//! - Parsing with the source's predicates
//! - Pivot chain verification for LOTLs
//! - Signature validation

pub mod context;
pub mod stages;

pub use context::*;
pub use stages::*;
