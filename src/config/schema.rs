//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::CompressType;

/// Root configuration for the RPC client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-channel session policy.
    pub channel: ChannelConfig,

    /// Socket settings.
    pub transport: TransportConfig,

    /// Completion worker pool.
    pub workers: WorkerConfig,

    /// Payload compression per method.
    pub compression: CompressionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Session policy applied to every service channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// HTTP path that opens the RPC tunnel.
    pub rpc_path: String,

    /// Period of the maintenance tick (timeouts, reconnects, idle close).
    pub tick_interval_ms: u64,

    /// Fixed delay before reconnecting a dropped address.
    pub reconnect_delay_ms: u64,

    /// Close all sessions after this long without a send.
    pub idle_timeout_ms: u64,

    /// Call timeout when the caller gives none.
    pub default_timeout_ms: u64,

    /// Largest request payload accepted, in bytes.
    pub max_request_size: usize,

    /// Idle channels kept for reuse before being shut down.
    pub channel_cache_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            rpc_path: "/__rpc_service__".to_string(),
            tick_interval_ms: 100,
            reconnect_delay_ms: 3_000,
            idle_timeout_ms: 60_000,
            default_timeout_ms: 10_000,
            max_request_size: 32 * 1024 * 1024,
            channel_cache_size: 10,
        }
    }
}

impl ChannelConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Socket settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,

    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,

    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            max_frame_size: 64 * 1024 * 1024,
            nodelay: true,
        }
    }
}

/// Completion worker pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { threads: 4 }
    }
}

/// Compression for one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MethodCompression {
    /// Codec for request bodies.
    pub request: CompressType,

    /// Codec the server should use for responses.
    pub response: Option<CompressType>,
}

/// Payload compression.
///
/// ```toml
/// [compression]
/// default = "none"
///
/// [compression.methods."echo.EchoService.Echo"]
/// request = "gzip"
/// response = "gzip"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CompressionConfig {
    pub default: CompressType,

    /// Keyed by fully qualified method name.
    pub methods: HashMap<String, MethodCompression>,
}

impl CompressionConfig {
    pub fn for_method(&self, method: &str) -> MethodCompression {
        self.methods.get(method).copied().unwrap_or(MethodCompression {
            request: self.default,
            response: None,
        })
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
