//! Parsing stage.
//!
//! - Serde model of the normalized trusted list document
//! - `ParsingTask` applying a source's predicates and resource limits

pub mod document;
pub mod task;

pub use document::*;
pub use task::*;
