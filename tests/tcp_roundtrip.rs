//! End-to-end calls over real TCP sockets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rpc_session::observability::logging::init_logging;
use rpc_session::{CallOptions, CompressType, ConnectStatus, RpcClient, RpcError, StaticResolver};
use tokio::time;

mod common;

use common::{fast_config, start_echo_server, start_rpc_server, Reply};

fn client() -> RpcClient {
    let config = fast_config();
    init_logging(&config.observability);
    RpcClient::builder()
        .config(config)
        .resolver(Arc::new(StaticResolver::new()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_echo_round_trip() {
    let addr = start_echo_server("echo:").await;
    let client = client();
    let channel = client.channel(&addr.to_string()).unwrap();

    let reply = channel
        .call("echo.EchoService.Echo", "hello", CallOptions::new())
        .await
        .unwrap();
    assert_eq!(reply, Bytes::from_static(b"echo:hello"));
    assert_eq!(channel.status(), ConnectStatus::Connected);
}

#[tokio::test]
async fn test_gzip_round_trip() {
    let addr = start_echo_server("").await;
    let client = client();
    let channel = client.channel(&addr.to_string()).unwrap();

    let payload = "compressible ".repeat(512);
    let options = CallOptions::new().compress(CompressType::Gzip, Some(CompressType::Gzip));
    let reply = channel
        .call("echo.EchoService.Echo", payload.clone(), options)
        .await
        .unwrap();
    assert_eq!(reply, Bytes::from(payload));
}

#[tokio::test]
async fn test_many_concurrent_calls_share_sessions() {
    let addr = start_echo_server("").await;
    let client = client();
    let channel = client.channel(&addr.to_string()).unwrap();

    let mut tasks = Vec::new();
    for i in 0..50 {
        let channel = channel.clone();
        tasks.push(tokio::spawn(async move {
            channel
                .call("echo.EchoService.Echo", format!("call-{}", i), CallOptions::new())
                .await
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply, Bytes::from(format!("call-{}", i)));
    }
    assert_eq!(channel.service().group().len(), 1);
}

#[tokio::test]
async fn test_remote_failure() {
    let addr = start_rpc_server(|_, method, _| Reply::Fail(12, format!("{} is not implemented", method))).await;
    let client = client();
    let channel = client.channel(&addr.to_string()).unwrap();

    let err = channel
        .call("echo.EchoService.Missing", "x", CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RpcError::Remote {
            code: 12,
            reason: "echo.EchoService.Missing is not implemented".into()
        }
    );
}

#[tokio::test]
async fn test_request_survives_dropped_connection() {
    let addr = start_rpc_server(|connection, _, payload| {
        if connection == 0 {
            Reply::Close
        } else {
            Reply::Ok(payload.to_vec())
        }
    })
    .await;
    let client = client();
    let channel = client.channel(&addr.to_string()).unwrap();

    let reply = time::timeout(
        Duration::from_secs(5),
        channel.call("echo.EchoService.Echo", "retry me", CallOptions::new()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply, Bytes::from_static(b"retry me"));
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let addr = start_rpc_server(|_, _, _| Reply::Silent).await;
    let client = client();
    let channel = client.channel(&addr.to_string()).unwrap();

    let options = CallOptions::new().timeout(Duration::from_millis(150));
    let err = channel
        .call("echo.EchoService.Echo", "anyone?", options)
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Timeout);
    assert_eq!(channel.service().pending_requests(), 0);
}

#[tokio::test]
async fn test_unreachable_server_keeps_request_until_timeout() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client();
    let channel = client.channel(&addr.to_string()).unwrap();
    let options = CallOptions::new().timeout(Duration::from_millis(300));
    let err = channel
        .call("echo.EchoService.Echo", "hello", options)
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Timeout);
    assert!(channel.service().group().connect_failures() >= 1);
}

#[tokio::test]
async fn test_shutdown_fails_outstanding_calls() {
    let addr = start_rpc_server(|_, _, _| Reply::Silent).await;
    let client = client();
    let channel = client.channel(&addr.to_string()).unwrap();

    let pending = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .call("echo.EchoService.Echo", "never answered", CallOptions::new())
                .await
        })
    };
    time::sleep(Duration::from_millis(100)).await;

    client.shutdown();
    assert_eq!(pending.await.unwrap(), Err(RpcError::ChannelShutdown));
    assert_eq!(
        channel.call("echo.EchoService.Echo", "late", CallOptions::new()).await,
        Err(RpcError::ChannelShutdown)
    );
}

#[tokio::test]
async fn test_callback_runs_exactly_once() {
    let addr = start_echo_server("").await;
    let client = client();
    let channel = client.channel(&addr.to_string()).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = tokio::sync::oneshot::channel();
    let counter = calls.clone();
    channel.call_with_callback("echo.EchoService.Echo", "cb", CallOptions::new(), move |result| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(result);
    });

    assert_eq!(rx.await.unwrap(), Ok(Bytes::from_static(b"cb")));
    time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_call_from_plain_thread() {
    let addr = start_echo_server("sync:").await;
    let client = client();
    let channel = client.channel(&addr.to_string()).unwrap();

    let reply = tokio::task::spawn_blocking(move || {
        channel.call_blocking("echo.EchoService.Echo", "blocking", CallOptions::new())
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply, Bytes::from_static(b"sync:blocking"));
}
