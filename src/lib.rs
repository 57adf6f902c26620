//! TL Refresh - Trusted List refresh engine
//!
//! Maintains a continuously refreshed map from certificates to the trust
//! properties asserted about them by European Trusted Lists and the List of
//! Trusted Lists. The implementation prioritizes:
//!
//! 1. **Correctness** - Trust only flows from signature-verified content
//! 2. **Logging** - Every stage decision logged with cycle and source context
//! 3. **Availability** - Failures keep the last good result readable
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `config` - Engine settings, source descriptors and filter predicates
//! - `model` - Certificates, parsed list content, time-dependent status
//! - `cache` - Per-stage cache records, source nodes and the keyed store
//! - `fetch` - Fetch adapter contract and provided adapters
//! - `parsing` - Document decoding with provider/service/pointer filtering
//! - `validation` - Structure verification and signature verification
//! - `pivot` - LOTL signing certificate rotation (pivot chain)
//! - `trust` - Trust propagation and the published trust map
//! - `pipeline` - Per-source stage pipeline and cycle context
//! - `job` - Cycle orchestration, job summary and the engine facade
//! - `alerts` - Alerts raised over each cycle's summary
//! - `logging` - Structured logging with cycle context

pub mod alerts;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod job;
pub mod logging;
pub mod model;
pub mod parsing;
pub mod pipeline;
pub mod pivot;
pub mod trust;
pub mod validation;

pub use alerts::{Alert, AlertHandler, LogAlertHandler};
pub use config::{EngineConfig, FilterSpec, ResourceLimits, SourceConfig, SourceId, SourceKind};
pub use error::{TlError, TlResult};
pub use fetch::{DirectoryFetcher, FetchAdapter, FetchedDocument, InMemoryFetcher};
pub use job::{CycleReport, JobSummary, LotlSummary, SourceInfo, TrustListEngine};
pub use model::{CertificateToken, EntityKey};
pub use trust::{SynchronizationStrategy, TrustMap, TrustProperties};
pub use validation::{
    Ed25519DocumentVerifier, SignatureCheck, SignatureVerdict, SignatureVerifier,
    StructureVerifier,
};

/// Initialize the default logger.
///
/// Millisecond timestamps, `Info` unless `RUST_LOG` says otherwise. Safe to
/// call more than once.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .try_init();
}
