//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! channel / queue / session events
//!     → tracing events with structured fields (logging.rs installs a subscriber)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout via tracing-subscriber fmt layer
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;
