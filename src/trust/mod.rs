//! Trust propagation.
//!
//! - `TrustProperties` and the published `TrustMap`
//! - `TrustPropagator` building a fresh map each cycle
//! - Synchronization strategy deciding which validated lists count

pub mod map;
pub mod propagator;
pub mod strategy;

pub use map::*;
pub use propagator::*;
pub use strategy::*;
