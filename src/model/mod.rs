//! Domain model.
//!
//! - Certificate tokens and the entity keys used to index them
//! - Time-dependent value sequences for service status history
//! - Parsed trusted list / list of trusted lists content

pub mod certificate;
pub mod timeline;
pub mod trusted_list;

pub use certificate::*;
pub use timeline::*;
pub use trusted_list::*;
