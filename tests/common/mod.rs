//! Shared utilities for end-to-end tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rpc_session::config::ClientConfig;
use rpc_session::protocol::{CompressType, Envelope, MetaKind, RpcMeta, FRAME_HEADER_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the mock server does with one request.
#[allow(dead_code)]
pub enum Reply {
    Ok(Vec<u8>),
    Fail(u32, String),
    /// Drop the connection without answering.
    Close,
    /// Never answer.
    Silent,
}

type Handler = dyn Fn(usize, &str, Bytes) -> Reply + Send + Sync;

/// Start an RPC server on an ephemeral port.
///
/// `handler` receives the zero-based index of the accepted connection, the
/// method name and the decompressed payload.
pub async fn start_rpc_server<F>(handler: F) -> SocketAddr
where
    F: Fn(usize, &str, Bytes) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler: Arc<Handler> = Arc::new(handler);
    let accepted = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let index = accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve(socket, index, handler.clone()));
        }
    });
    addr
}

/// Echo server that prefixes replies with `tag`.
#[allow(dead_code)]
pub async fn start_echo_server(tag: &'static str) -> SocketAddr {
    start_rpc_server(move |_, _, payload| {
        let mut reply = tag.as_bytes().to_vec();
        reply.extend_from_slice(&payload);
        Reply::Ok(reply)
    })
    .await
}

async fn serve(mut socket: TcpStream, index: usize, handler: Arc<Handler>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if socket.read_exact(&mut byte).await.is_err() {
            return;
        }
        head.push(byte[0]);
    }
    if !head.starts_with(b"POST ") {
        return;
    }
    if socket.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.is_err() {
        return;
    }

    loop {
        let mut header = [0u8; FRAME_HEADER_LEN];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let meta_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let body_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut frame = header.to_vec();
        frame.resize(FRAME_HEADER_LEN + meta_len + body_len, 0);
        if socket.read_exact(&mut frame[FRAME_HEADER_LEN..]).await.is_err() {
            return;
        }

        let request = Envelope::decode(&frame).unwrap();
        let sequence_id = request.meta.sequence_id;
        let (method, response_compress) = match &request.meta.kind {
            MetaKind::Request { method, expected_response_compress, .. } => (
                method.clone(),
                expected_response_compress.unwrap_or(CompressType::None),
            ),
            MetaKind::Response { .. } => return,
        };
        let payload = request.open(64 << 20).unwrap();

        let reply = match handler(index, &method, payload) {
            Reply::Ok(body) => {
                Envelope::seal(RpcMeta::response(sequence_id, response_compress), &body).unwrap()
            }
            Reply::Fail(code, reason) => {
                Envelope::seal(RpcMeta::failure(sequence_id, code, reason), &[]).unwrap()
            }
            Reply::Close => return,
            Reply::Silent => continue,
        };
        if socket.write_all(&reply.encode().unwrap()).await.is_err() {
            return;
        }
    }
}

/// Short timers so reconnects and sweeps happen within a test.
pub fn fast_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.channel.tick_interval_ms = 10;
    config.channel.reconnect_delay_ms = 100;
    config.workers.threads = 2;
    config
}
