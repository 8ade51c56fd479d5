//! Error taxonomy for the session engine.
//!
//! Transport and decode failures are handled inside the engine (redispatch,
//! reconnect); only [`RpcError`] ever reaches a caller, always through the
//! request's completion.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::queue::PendingRequest;

/// Stable numeric codes for the "failed + error text" pair seen by callers.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unknown = 0,
    ConnectionClosed = 1,
    Timeout = 2,
    ChannelShutdown = 3,
    Remote = 4,
    Uncompress = 5,
    RequestTooLarge = 6,
    Resolve = 7,
    Internal = 8,
    Config = 9,
}

impl From<u32> for ErrorCode {
    fn from(val: u32) -> Self {
        match val {
            1 => ErrorCode::ConnectionClosed,
            2 => ErrorCode::Timeout,
            3 => ErrorCode::ChannelShutdown,
            4 => ErrorCode::Remote,
            5 => ErrorCode::Uncompress,
            6 => ErrorCode::RequestTooLarge,
            7 => ErrorCode::Resolve,
            8 => ErrorCode::Internal,
            9 => ErrorCode::Config,
            _ => ErrorCode::Unknown,
        }
    }
}

/// Caller-visible failure of a single call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("channel shutdown")]
    ChannelShutdown,

    /// The server executed the call and reported failure.
    #[error("remote error {code}: {reason}")]
    Remote { code: u32, reason: String },

    #[error("failed to decompress response: {0}")]
    Decompress(String),

    #[error("request too large: {size} bytes (limit {limit})")]
    RequestTooLarge { size: usize, limit: usize },

    #[error("failed to resolve service {0}")]
    Resolve(String),

    /// An internal invariant was violated; the call cannot be completed.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RpcError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RpcError::ConnectionClosed => ErrorCode::ConnectionClosed,
            RpcError::Timeout => ErrorCode::Timeout,
            RpcError::ChannelShutdown => ErrorCode::ChannelShutdown,
            RpcError::Remote { .. } => ErrorCode::Remote,
            RpcError::Decompress(_) => ErrorCode::Uncompress,
            RpcError::RequestTooLarge { .. } => ErrorCode::RequestTooLarge,
            RpcError::Resolve(_) => ErrorCode::Resolve,
            RpcError::Internal(_) => ErrorCode::Internal,
            RpcError::Config(_) => ErrorCode::Config,
        }
    }

    /// Short label used for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            RpcError::ConnectionClosed => "connection_closed",
            RpcError::Timeout => "timeout",
            RpcError::ChannelShutdown => "shutdown",
            RpcError::Remote { .. } => "remote_error",
            RpcError::Decompress(_) => "uncompress_error",
            RpcError::RequestTooLarge { .. } => "too_large",
            RpcError::Resolve(_) => "resolve_error",
            RpcError::Internal(_) => "internal_error",
            RpcError::Config(_) => "config_error",
        }
    }
}

impl From<ConfigError> for RpcError {
    fn from(err: ConfigError) -> Self {
        RpcError::Config(err.to_string())
    }
}

/// Malformed bytes on an RPC socket. Always fatal for that socket.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid http response head: {0}")]
    InvalidHeader(String),

    #[error("http response head exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("frame of {size} bytes exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("invalid frame metadata: {0}")]
    InvalidMeta(String),

    #[error("handshake rejected with status {0}")]
    HandshakeRejected(u16),

    #[error("peer sent a request frame to a client socket")]
    UnexpectedRequest,
}

impl From<bincode::Error> for ProtocolError {
    fn from(err: bincode::Error) -> Self {
        ProtocolError::InvalidMeta(err.to_string())
    }
}

/// Failure to create or drive a socket.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("socket already connected")]
    AlreadyConnected,

    #[error("no tokio runtime available")]
    NoRuntime,
}

/// Internal-consistency violations of the request queue.
///
/// Each variant hands the offending request back so its completion can still
/// fire exactly once.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("duplicate sequence id {}", .0.sequence_id)]
    DuplicateSequence(Box<PendingRequest>),

    #[error("sequence id {} missing from connection index", .0.sequence_id)]
    MissingIndexEntry(Box<PendingRequest>),
}

impl QueueError {
    pub fn into_request(self) -> PendingRequest {
        match self {
            QueueError::DuplicateSequence(req) | QueueError::MissingIndexEntry(req) => *req,
        }
    }
}

pub type Result<T, E = RpcError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_u32() {
        for err in [
            RpcError::ConnectionClosed,
            RpcError::Timeout,
            RpcError::Remote { code: 7, reason: "x".into() },
            RpcError::Decompress("bad".into()),
        ] {
            let code = err.code();
            assert_eq!(ErrorCode::from(code as u32), code);
        }
        assert_eq!(ErrorCode::from(0), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from(4096), ErrorCode::Unknown);
    }

    #[test]
    fn test_error_text() {
        let err = RpcError::Remote { code: 3, reason: "no such method".into() };
        assert_eq!(err.to_string(), "remote error 3: no such method");
        assert_eq!(RpcError::Timeout.outcome(), "timeout");
    }
}
