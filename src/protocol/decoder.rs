//! Incremental per-socket decoder.
//!
//! # Responsibilities
//! - Accumulate bytes until a complete HTTP response head is present
//! - Short-circuit messages that carry no body
//! - Split the tunneled body into length-prefixed packets and hand each one
//!   to a [`FrameSink`]
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → header_received == false: buffer until "\r\n\r\n", parse head
//!         → no body (1xx/204/304/Content-Length: 0): on_message_complete
//!         → otherwise header_received = true
//!     → header_received == true: BodyDetector sizes the next packet
//!         → fully buffered in the chunk: on_frame(slice), no copy
//!         → partial: accumulate into a packet-sized buffer across calls
//!     → declared Content-Length fully consumed: on_message_complete,
//!       header_received = false
//! ```
//!
//! # Design Decisions
//! - Packet sizing is an injected strategy, delivery a sink trait; the
//!   decoder knows nothing about RPC metadata
//! - A body without Content-Length is the persistent tunnel and lasts until
//!   the socket closes
//! - Every error is fatal for the socket; the decoder is not reusable after
//!   one without [`FrameDecoder::reset`]

use bytes::BytesMut;

use crate::error::ProtocolError;
use crate::protocol::frame::{declared_frame_size, FRAME_HEADER_LEN};
use crate::protocol::http::{parse_response_head, ResponseHead};

/// Sizes the next packet of a body stream.
pub trait BodyDetector: Send {
    /// Bytes needed before [`packet_size`](Self::packet_size) can decide.
    fn header_len(&self) -> usize;

    /// Total packet size, or `None` if `buf` is shorter than the header.
    fn packet_size(&self, buf: &[u8]) -> Option<usize>;
}

/// Sizes RPC frames by their two big-endian length words.
#[derive(Debug, Default, Clone, Copy)]
pub struct RpcPacketDetector;

impl BodyDetector for RpcPacketDetector {
    fn header_len(&self) -> usize {
        FRAME_HEADER_LEN
    }

    fn packet_size(&self, buf: &[u8]) -> Option<usize> {
        declared_frame_size(buf)
    }
}

/// Receives decoded units from a [`FrameDecoder`].
pub trait FrameSink {
    fn on_head(&mut self, head: &ResponseHead) -> Result<(), ProtocolError>;

    /// The current HTTP message ended; a new head is expected next.
    fn on_message_complete(&mut self) -> Result<(), ProtocolError>;

    /// One complete packet, header included.
    fn on_frame(&mut self, frame: &[u8]) -> Result<(), ProtocolError>;
}

pub struct FrameDecoder<D: BodyDetector = RpcPacketDetector> {
    detector: D,
    header_received: bool,
    head_buf: BytesMut,
    body_buf: BytesMut,
    /// Size of the packet being accumulated in `body_buf`, once known.
    expected: Option<usize>,
    /// Declared Content-Length of the current message, if any.
    content_length: Option<usize>,
    body_received: usize,
    max_frame_size: usize,
}

impl FrameDecoder<RpcPacketDetector> {
    pub fn new(max_frame_size: usize) -> Self {
        Self::with_detector(RpcPacketDetector, max_frame_size)
    }
}

impl<D: BodyDetector> FrameDecoder<D> {
    pub fn with_detector(detector: D, max_frame_size: usize) -> Self {
        Self {
            detector,
            header_received: false,
            head_buf: BytesMut::new(),
            body_buf: BytesMut::new(),
            expected: None,
            content_length: None,
            body_received: 0,
            max_frame_size,
        }
    }

    pub fn header_received(&self) -> bool {
        self.header_received
    }

    /// Bytes held back waiting for the rest of a head or packet.
    pub fn buffered(&self) -> usize {
        self.head_buf.len() + self.body_buf.len()
    }

    pub fn reset(&mut self) {
        self.header_received = false;
        self.head_buf.clear();
        self.body_buf.clear();
        self.expected = None;
        self.content_length = None;
        self.body_received = 0;
    }

    /// Consume one chunk read from the socket.
    pub fn feed<S: FrameSink + ?Sized>(
        &mut self,
        mut data: &[u8],
        sink: &mut S,
    ) -> Result<(), ProtocolError> {
        while !data.is_empty() {
            data = if self.header_received {
                self.feed_body(data, sink)?
            } else {
                self.feed_head(data, sink)?
            };
        }
        Ok(())
    }

    fn feed_head<'a, S: FrameSink + ?Sized>(
        &mut self,
        data: &'a [u8],
        sink: &mut S,
    ) -> Result<&'a [u8], ProtocolError> {
        let already = self.head_buf.len();
        self.head_buf.extend_from_slice(data);

        let (head, used) = match parse_response_head(&self.head_buf)? {
            Some(parsed) => parsed,
            None => return Ok(&[]),
        };
        self.head_buf.clear();
        let rest = &data[used.saturating_sub(already)..];

        sink.on_head(&head)?;
        if head.expects_body() {
            self.header_received = true;
            self.content_length = head.content_length;
            self.body_received = 0;
        } else {
            sink.on_message_complete()?;
        }
        Ok(rest)
    }

    fn feed_body<'a, S: FrameSink + ?Sized>(
        &mut self,
        mut data: &'a [u8],
        sink: &mut S,
    ) -> Result<&'a [u8], ProtocolError> {
        if self.body_buf.is_empty() {
            if let Some(size) = self.detector.packet_size(data) {
                self.check_size(size)?;
                if data.len() >= size {
                    sink.on_frame(&data[..size])?;
                    self.consume_body(size, sink)?;
                    return Ok(&data[size..]);
                }
            }
        }

        let start = data.len();
        if self.expected.is_none() {
            let want = self.detector.header_len().saturating_sub(self.body_buf.len());
            let take = want.min(data.len());
            self.body_buf.extend_from_slice(&data[..take]);
            data = &data[take..];

            if let Some(size) = self.detector.packet_size(&self.body_buf) {
                self.check_size(size)?;
                self.expected = Some(size);
                self.body_buf.reserve(size - self.body_buf.len());
            }
        }

        if let Some(size) = self.expected {
            let take = (size - self.body_buf.len()).min(data.len());
            self.body_buf.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.body_buf.len() == size {
                sink.on_frame(&self.body_buf)?;
                self.body_buf.clear();
                self.expected = None;
            }
        }

        self.consume_body(start - data.len(), sink)?;
        Ok(data)
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }
        if size < self.detector.header_len() {
            return Err(ProtocolError::InvalidMeta(format!("packet size {} below header", size)));
        }
        Ok(())
    }

    fn consume_body<S: FrameSink + ?Sized>(
        &mut self,
        n: usize,
        sink: &mut S,
    ) -> Result<(), ProtocolError> {
        self.body_received += n;
        let Some(limit) = self.content_length else {
            return Ok(());
        };
        if self.body_received > limit {
            return Err(ProtocolError::InvalidMeta("packet overruns content-length".into()));
        }
        if self.body_received == limit {
            if !self.body_buf.is_empty() {
                return Err(ProtocolError::InvalidMeta("body ended inside a packet".into()));
            }
            self.header_received = false;
            self.content_length = None;
            self.body_received = 0;
            sink.on_message_complete()?;
        }
        Ok(())
    }
}
