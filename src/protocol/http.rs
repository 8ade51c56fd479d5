//! HTTP/1.1 start-line and header codec for the RPC tunnel.
//!
//! # Responsibilities
//! - Generate the one-shot handshake request sent on every new socket
//! - Parse the server's response head and decide whether a body follows
//!
//! # Design Decisions
//! - Stateless: callers own buffering; parsing reports "need more bytes"
//!   with `Ok(None)`
//! - Header blocks larger than [`MAX_HEAD_SIZE`] are treated as garbage

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::compression::CompressType;

/// Advertises the codecs the client can decode, as a comma-separated id list.
pub const COMPRESS_TYPE_HEADER: &str = "X-Rpc-Compress-Type";

pub const MAX_HEAD_SIZE: usize = 8 * 1024;

const MAX_HEADERS: usize = 32;

/// Parsed status line and headers of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub content_length: Option<usize>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// False when the message is complete without a body: informational
    /// statuses, 204, 304, or an explicit zero content length.
    pub fn expects_body(&self) -> bool {
        !(self.status < 200
            || self.status == 204
            || self.status == 304
            || self.content_length == Some(0))
    }
}

/// Parse a response head from the front of `buf`.
///
/// Returns the head and the number of bytes it occupied, or `None` when the
/// blank line terminating the header block has not arrived yet.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, ProtocolError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let consumed = match response.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            if buf.len() > MAX_HEAD_SIZE {
                return Err(ProtocolError::HeaderTooLarge { limit: MAX_HEAD_SIZE });
            }
            return Ok(None);
        }
        Err(e) => return Err(ProtocolError::InvalidHeader(e.to_string())),
    };
    if consumed > MAX_HEAD_SIZE {
        return Err(ProtocolError::HeaderTooLarge { limit: MAX_HEAD_SIZE });
    }

    let status = response
        .code
        .ok_or_else(|| ProtocolError::InvalidHeader("missing status code".into()))?;

    let mut content_length = None;
    let mut parsed = Vec::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| ProtocolError::InvalidHeader(format!("non-utf8 value for {}", header.name)))?
            .trim()
            .to_string();
        if header.name.eq_ignore_ascii_case("content-length") {
            let len = value
                .parse::<usize>()
                .map_err(|_| ProtocolError::InvalidHeader(format!("bad content-length {:?}", value)))?;
            content_length = Some(len);
        }
        parsed.push((header.name.to_string(), value));
    }

    let head = ResponseHead {
        status,
        reason: response.reason.unwrap_or_default().to_string(),
        headers: parsed,
        content_length,
    };
    Ok(Some((head, consumed)))
}

/// The request that opens the RPC tunnel on a fresh socket.
pub fn handshake_request(rpc_path: &str, supported: &[CompressType]) -> Bytes {
    let ids = supported
        .iter()
        .map(|c| c.id().to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut buf = BytesMut::with_capacity(64 + rpc_path.len());
    buf.put_slice(b"POST ");
    buf.put_slice(rpc_path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    buf.put_slice(COMPRESS_TYPE_HEADER.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(ids.as_bytes());
    buf.put_slice(b"\r\n\r\n");
    buf.freeze()
}
