//! Payload compression codecs.

use std::fmt;
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

/// Compression applied to a frame body. The numeric id is advertised in the
/// handshake header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressType {
    #[default]
    None = 0,
    Gzip = 1,
}

impl CompressType {
    /// Every codec this client can decode.
    pub const SUPPORTED: [CompressType; 2] = [CompressType::None, CompressType::Gzip];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn compress(self, data: &[u8]) -> std::io::Result<Bytes> {
        match self {
            CompressType::None => Ok(Bytes::copy_from_slice(data)),
            CompressType::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                Ok(Bytes::from(encoder.finish()?))
            }
        }
    }

    /// Decode `data`, refusing output larger than `limit` bytes.
    pub fn decompress(self, data: &[u8], limit: usize) -> std::io::Result<Bytes> {
        let out = match self {
            CompressType::None => data.to_vec(),
            CompressType::Gzip => {
                let mut decoder = GzDecoder::new(data).take((limit as u64).saturating_add(1));
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                out
            }
        };
        if out.len() > limit {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("decompressed body exceeds {} bytes", limit),
            ));
        }
        Ok(Bytes::from(out))
    }
}

impl fmt::Display for CompressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressType::None => write!(f, "none"),
            CompressType::Gzip => write!(f, "gzip"),
        }
    }
}
