//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for embedding applications
//! - Honour `RUST_LOG` over the configured level
//!
//! # Design Decisions
//! - The library only emits `tracing` events; installing a subscriber is the
//!   application's choice, this is a convenience for it

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Default filter directive for `level`.
pub fn default_directive(level: &str) -> String {
    format!("rpc_session={}", level.to_ascii_lowercase())
}

/// Install a global fmt subscriber. Returns `false` if one was already set.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive(&config.log_level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
