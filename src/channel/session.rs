//! Per-socket adapter between the transport and its channel.
//!
//! Sends the handshake once the socket connects, feeds every read through
//! a [`FrameDecoder`], and reports session readiness, responses and closure
//! to the owning [`ServiceChannel`]. Any decode error closes the socket.

use std::io;
use std::sync::Weak;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::channel::service::ServiceChannel;
use crate::error::ProtocolError;
use crate::load_balancer::ConnectionId;
use crate::protocol::{Envelope, FrameDecoder, FrameSink, ResponseHead};
use crate::transport::{SocketHandle, TransportEvents};

pub struct RpcSession {
    channel: Weak<ServiceChannel>,
    id: ConnectionId,
    handshake: Bytes,
    decoder: Mutex<FrameDecoder>,
}

impl RpcSession {
    pub fn new(
        channel: Weak<ServiceChannel>,
        id: ConnectionId,
        handshake: Bytes,
        max_frame_size: usize,
    ) -> Self {
        Self {
            channel,
            id,
            handshake,
            decoder: Mutex::new(FrameDecoder::new(max_frame_size)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Routes decoded units of one read to the channel.
struct ChannelSink<'a> {
    channel: &'a ServiceChannel,
    id: ConnectionId,
    /// Set when the channel declined the session.
    rejected: bool,
}

impl FrameSink for ChannelSink<'_> {
    fn on_head(&mut self, head: &ResponseHead) -> Result<(), ProtocolError> {
        if head.status != 200 {
            return Err(ProtocolError::HandshakeRejected(head.status));
        }
        if !self.channel.on_new_session(self.id) {
            self.rejected = true;
        }
        Ok(())
    }

    fn on_message_complete(&mut self) -> Result<(), ProtocolError> {
        tracing::debug!(channel = %self.channel.name(), connection = %self.id, "Http message complete");
        Ok(())
    }

    fn on_frame(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        let envelope = Envelope::decode(frame)?;
        self.channel.on_response(self.id, envelope)
    }
}

impl TransportEvents for RpcSession {
    fn on_connected(&self, socket: &dyn SocketHandle) {
        tracing::debug!(connection = %self.id, address = %socket.address(), "Socket connected, sending handshake");
        if !socket.send(self.handshake.clone()) {
            socket.close();
        }
    }

    fn on_data(&self, socket: &dyn SocketHandle, data: &[u8]) {
        let Some(channel) = self.channel.upgrade() else {
            socket.close();
            return;
        };
        let mut sink = ChannelSink {
            channel: &channel,
            id: self.id,
            rejected: false,
        };

        let result = self.decoder.lock().feed(data, &mut sink);
        if let Err(e) = result {
            tracing::warn!(
                channel = %channel.name(),
                connection = %self.id,
                address = %socket.address(),
                error = %e,
                "Protocol error, closing connection"
            );
            socket.close();
        } else if sink.rejected {
            socket.close();
        }
    }

    fn on_closed(&self, _socket: &dyn SocketHandle, error: Option<io::Error>) {
        self.decoder.lock().reset();
        if let Some(channel) = self.channel.upgrade() {
            channel.on_close(self.id, error.as_ref());
        }
    }
}

