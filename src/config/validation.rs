//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes within protocol limits)
//! - Check addresses and paths are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ClientConfig;

/// One failed semantic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let channel = &config.channel;

    if !channel.rpc_path.starts_with('/') || channel.rpc_path.contains(char::is_whitespace) {
        errors.push(ValidationError::new(
            "channel.rpc_path",
            format!("{:?} is not an absolute path", channel.rpc_path),
        ));
    }
    for (field, value) in [
        ("channel.tick_interval_ms", channel.tick_interval_ms),
        ("channel.reconnect_delay_ms", channel.reconnect_delay_ms),
        ("channel.idle_timeout_ms", channel.idle_timeout_ms),
        ("channel.default_timeout_ms", channel.default_timeout_ms),
        ("transport.connect_timeout_ms", config.transport.connect_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if channel.max_request_size == 0 || channel.max_request_size > u32::MAX as usize {
        errors.push(ValidationError::new(
            "channel.max_request_size",
            "must be between 1 and 4294967295",
        ));
    }
    if config.transport.max_frame_size < crate::protocol::FRAME_HEADER_LEN {
        errors.push(ValidationError::new(
            "transport.max_frame_size",
            "must hold at least a frame header",
        ));
    }
    if config.workers.threads == 0 {
        errors.push(ValidationError::new("workers.threads", "must be greater than 0"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
