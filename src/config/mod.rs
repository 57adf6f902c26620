//! Engine and source configuration.
//!
//! - JSON engine settings with defaults and validation
//! - Source descriptors, configured or derived from LOTL pointers
//! - Filter predicates applied while parsing

pub mod filters;
pub mod settings;
pub mod source;

pub use filters::*;
pub use settings::*;
pub use source::*;
