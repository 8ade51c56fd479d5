//! Tokio TCP transport.
//!
//! # Responsibilities
//! - Connect with a timeout
//! - Pump writes queued by `send` and reads into `on_data` from one task
//! - Report closure exactly once
//!
//! # Data Flow
//! ```text
//! connect(events) → spawn task
//!     → TcpStream::connect (timeout)      ── error ──▶ on_closed(Some(err))
//!     → on_connected
//!     → loop select!
//!         command rx: Write(bytes) → write_all
//!                     Close / all senders gone → exit
//!         socket read: n > 0 → on_data
//!                      0 / error → exit
//!     → on_closed
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::resolver::validate_address;
use crate::transport::{SocketHandle, Transport, TransportEvents};

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct TcpTransport {
    runtime: Handle,
    connect_timeout: Duration,
    nodelay: bool,
}

impl TcpTransport {
    pub fn new(runtime: Handle, config: &TransportConfig) -> Self {
        Self {
            runtime,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            nodelay: config.nodelay,
        }
    }

    /// Use the runtime of the calling context.
    pub fn current(config: &TransportConfig) -> Result<Self, TransportError> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        Ok(Self::new(runtime, config))
    }
}

impl Transport for TcpTransport {
    fn create(&self, address: &str) -> Result<Arc<dyn SocketHandle>, TransportError> {
        validate_address(address).map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
        Ok(Arc::new(TcpSocket::new(
            address,
            self.runtime.clone(),
            self.connect_timeout,
            self.nodelay,
        )))
    }
}

enum Command {
    Write(Bytes),
    Close,
}

struct Shared {
    address: String,
    runtime: Handle,
    connect_timeout: Duration,
    nodelay: bool,
    commands: mpsc::UnboundedSender<Command>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    closed: AtomicBool,
}

/// One TCP connection driven by a background task.
#[derive(Clone)]
pub struct TcpSocket {
    shared: Arc<Shared>,
}

impl TcpSocket {
    fn new(address: &str, runtime: Handle, connect_timeout: Duration, nodelay: bool) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                address: address.to_string(),
                runtime,
                connect_timeout,
                nodelay,
                commands,
                receiver: Mutex::new(Some(receiver)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    async fn run(self, events: Arc<dyn TransportEvents>, mut commands: mpsc::UnboundedReceiver<Command>) {
        let shared = &self.shared;
        let connect = TcpStream::connect(shared.address.as_str());
        let stream = match time::timeout(shared.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                shared.closed.store(true, Ordering::Release);
                events.on_closed(&self, Some(e));
                return;
            }
            Err(_) => {
                shared.closed.store(true, Ordering::Release);
                let err = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
                events.on_closed(&self, Some(err));
                return;
            }
        };
        if shared.closed.load(Ordering::Acquire) {
            events.on_closed(&self, None);
            return;
        }
        if let Err(e) = stream.set_nodelay(shared.nodelay) {
            tracing::debug!(address = %shared.address, error = %e, "Failed to set TCP_NODELAY");
        }

        events.on_connected(&self);

        let (mut reader, mut writer) = stream.into_split();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let error = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Write(bytes)) => {
                        if let Err(e) = writer.write_all(&bytes).await {
                            break Some(e);
                        }
                    }
                    Some(Command::Close) | None => break None,
                },
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break None,
                    Ok(n) => events.on_data(&self, &buf[..n]),
                    Err(e) => break Some(e),
                },
            }
        };

        shared.closed.store(true, Ordering::Release);
        let _ = writer.shutdown().await;
        events.on_closed(&self, error);
    }
}

impl SocketHandle for TcpSocket {
    fn address(&self) -> &str {
        &self.shared.address
    }

    fn connect(&self, events: Arc<dyn TransportEvents>) -> Result<(), TransportError> {
        let receiver = self
            .shared
            .receiver
            .lock()
            .take()
            .ok_or(TransportError::AlreadyConnected)?;
        let socket = self.clone();
        self.shared.runtime.spawn(socket.run(events, receiver));
        Ok(())
    }

    fn send(&self, data: Bytes) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }
        self.shared.commands.send(Command::Write(data)).is_ok()
    }

    fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            let _ = self.shared.commands.send(Command::Close);
        }
    }
}
