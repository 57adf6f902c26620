//! Document validation.
//!
//! - Version-driven structure verification (advisory)
//! - Signature verification seam with an Ed25519 reference verifier
//! - JSON path resolution shared by both

pub mod json_path;
pub mod signature;
pub mod structure;

pub use json_path::*;
pub use signature::*;
pub use structure::*;
