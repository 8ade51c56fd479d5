//! RPC frame layout.
//!
//! ```text
//! +----------------+-------------------+-----------------+------------------+
//! | meta_len (u32) | body_len (u32)    | meta (bincode)  | body (payload)   |
//! +----------------+-------------------+-----------------+------------------+
//!   big endian       big endian          meta_len bytes    body_len bytes
//! ```

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::meta::RpcMeta;

/// Two big-endian u32 lengths.
pub const FRAME_HEADER_LEN: usize = 8;

/// Total frame size declared by an 8-byte header, or `None` when fewer than
/// 8 bytes are available.
pub fn declared_frame_size(header: &[u8]) -> Option<usize> {
    if header.len() < FRAME_HEADER_LEN {
        return None;
    }
    let mut buf = &header[..FRAME_HEADER_LEN];
    let meta_len = buf.get_u32() as usize;
    let body_len = buf.get_u32() as usize;
    Some(FRAME_HEADER_LEN + meta_len + body_len)
}

/// A decoded frame: metadata plus the body as it travelled on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub meta: RpcMeta,
    pub body: Bytes,
}

impl Envelope {
    /// Build an envelope, compressing `payload` with the codec named in the
    /// metadata.
    pub fn seal(meta: RpcMeta, payload: &[u8]) -> io::Result<Self> {
        let body = meta.compress_type.compress(payload)?;
        Ok(Self { meta, body })
    }

    /// The body with its codec undone, at most `limit` bytes of it.
    pub fn open(&self, limit: usize) -> io::Result<Bytes> {
        self.meta.compress_type.decompress(&self.body, limit)
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let meta = self.meta.encode()?;
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + meta.len() + self.body.len());
        buf.put_u32(length_u32(meta.len())?);
        buf.put_u32(length_u32(self.body.len())?);
        buf.put_slice(&meta);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    /// Decode one complete frame, header included.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let size = declared_frame_size(frame)
            .ok_or_else(|| ProtocolError::InvalidMeta("truncated frame header".into()))?;
        if frame.len() != size {
            return Err(ProtocolError::InvalidMeta(format!(
                "frame declares {} bytes but {} were supplied",
                size,
                frame.len()
            )));
        }
        let mut header = &frame[..FRAME_HEADER_LEN];
        let meta_len = header.get_u32() as usize;
        let meta_end = FRAME_HEADER_LEN + meta_len;

        let meta = RpcMeta::decode(&frame[FRAME_HEADER_LEN..meta_end])?;
        let body = Bytes::copy_from_slice(&frame[meta_end..]);
        Ok(Self { meta, body })
    }
}

fn length_u32(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        size: len,
        limit: u32::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::compression::CompressType;

    #[test]
    fn test_envelope_round_trip_with_gzip() {
        let payload = b"hello hello hello hello hello".repeat(16);
        let meta = RpcMeta::request(77, "echo.EchoService.Echo", 1000, CompressType::Gzip, None);
        let sealed = Envelope::seal(meta, &payload).unwrap();
        assert_ne!(sealed.body.as_ref(), payload.as_slice());

        let wire = sealed.encode().unwrap();
        let decoded = Envelope::decode(&wire).unwrap();

        assert_eq!(decoded.meta.sequence_id, 77);
        assert_eq!(decoded.meta.method(), Some("echo.EchoService.Echo"));
        assert_eq!(decoded.open(payload.len()).unwrap().as_ref(), payload.as_slice());
    }

    #[test]
    fn test_header_is_two_big_endian_lengths() {
        let meta = RpcMeta::response(1, CompressType::None);
        let wire = Envelope::seal(meta.clone(), b"xyz").unwrap().encode().unwrap();
        let meta_len = meta.encode().unwrap().len();

        assert_eq!(&wire[0..4], &(meta_len as u32).to_be_bytes());
        assert_eq!(&wire[4..8], &3u32.to_be_bytes());
        assert_eq!(declared_frame_size(&wire), Some(wire.len()));
        assert_eq!(declared_frame_size(&wire[..7]), None);
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let wire = Envelope::seal(RpcMeta::response(1, CompressType::None), b"abc")
            .unwrap()
            .encode()
            .unwrap();
        assert!(Envelope::decode(&wire[..wire.len() - 1]).is_err());
    }
}
