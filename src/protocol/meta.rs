//! Frame metadata.
//!
//! Request and response metadata share one header (sequence id and body
//! compression) and differ only in their kind-specific arm.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::protocol::compression::CompressType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcMeta {
    pub sequence_id: u64,
    /// Codec applied to the body of this frame.
    pub compress_type: CompressType,
    pub kind: MetaKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaKind {
    Request {
        /// Fully qualified method name, e.g. `echo.EchoService.Echo`.
        method: String,
        timeout_ms: u64,
        /// Codec the caller would like the response body compressed with.
        expected_response_compress: Option<CompressType>,
    },
    Response {
        failed: bool,
        error_code: u32,
        reason: String,
    },
}

impl RpcMeta {
    pub fn request(
        sequence_id: u64,
        method: impl Into<String>,
        timeout_ms: u64,
        compress_type: CompressType,
        expected_response_compress: Option<CompressType>,
    ) -> Self {
        Self {
            sequence_id,
            compress_type,
            kind: MetaKind::Request {
                method: method.into(),
                timeout_ms,
                expected_response_compress,
            },
        }
    }

    pub fn response(sequence_id: u64, compress_type: CompressType) -> Self {
        Self {
            sequence_id,
            compress_type,
            kind: MetaKind::Response {
                failed: false,
                error_code: 0,
                reason: String::new(),
            },
        }
    }

    pub fn failure(sequence_id: u64, error_code: u32, reason: impl Into<String>) -> Self {
        Self {
            sequence_id,
            compress_type: CompressType::None,
            kind: MetaKind::Response {
                failed: true,
                error_code,
                reason: reason.into(),
            },
        }
    }

    pub fn method(&self) -> Option<&str> {
        match &self.kind {
            MetaKind::Request { method, .. } => Some(method),
            MetaKind::Response { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
