//! Observability for the storefront services.
//!
//! - Subscriber set-up with JSON or pretty output
//! - Structured domain events for money and subscription changes
//! - Logging macros for retries, rule checks and external calls

pub mod domain_events;
pub mod init;
pub mod macros;

pub use domain_events::*;
pub use init::*;

// Re-export tracing for convenience
pub use tracing::{debug, error, info, warn, trace, span, Level, Instrument};
pub use tracing::instrument;
