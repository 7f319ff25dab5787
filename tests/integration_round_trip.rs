//! End-to-end tests over real Unix domain sockets
//!
//! Each test binds its own server under a temporary socket prefix and talks to
//! it through one or more client endpoints.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ipclane::ipc::FIXED_PAYLOAD_CAPACITY;
use ipclane::{
    ClientEndpoint, EchoHandler, FixedMessage, IpcConfig, IpcError, Message, Mode, ServerEndpoint, VariableMessage,
};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> IpcConfig {
    IpcConfig::default()
        .with_socket_prefix(dir.path())
        .with_worker_threads(2)
        .with_retry(3, 20)
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// Integration test: echoed payloads and timestamps come back unchanged
#[test]
fn test_rpc_round_trip_fixed() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut server = ServerEndpoint::<FixedMessage>::bind(config.clone(), "echo.sock", EchoHandler).unwrap();
    server.run(2).unwrap();

    let client = ClientEndpoint::<FixedMessage>::new(config, "echo.sock").unwrap();
    assert!(client.connect_blocking());

    for size in [0usize, 1, 13, 700, FIXED_PAYLOAD_CAPACITY] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        let request = FixedMessage::new(&payload, Mode::Rpc);
        let reply = client.send(request.clone()).wait().unwrap();

        assert_eq!(reply.payload(), payload.as_slice());
        assert_eq!(reply.timestamp(), request.timestamp());
        assert_eq!(reply.mode(), Mode::Rpc);
    }
}

/// Integration test: variable framing carries payloads beyond the fixed cap
#[test]
fn test_rpc_round_trip_variable_large() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut server = ServerEndpoint::<VariableMessage>::bind(config.clone(), "big.sock", EchoHandler).unwrap();
    server.run(2).unwrap();

    let client = ClientEndpoint::<VariableMessage>::new(config, "big.sock").unwrap();
    assert!(client.connect_blocking());

    let payload = vec![0xabu8; 256 * 1024];
    let reply = client.send(VariableMessage::new(&payload, Mode::Rpc)).wait().unwrap();
    assert_eq!(reply.payload_length(), payload.len());
    assert_eq!(reply.payload(), payload.as_slice());
}

/// Integration test: the handler's reply, not the request, comes back
#[test]
fn test_handler_transforms_reply() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let handler = |request: VariableMessage| {
        let mut reversed = request.payload().to_vec();
        reversed.reverse();
        VariableMessage::new(&reversed, Mode::Rpc)
    };
    let mut server = ServerEndpoint::<VariableMessage>::bind(config.clone(), "rev.sock", handler).unwrap();
    server.run(1).unwrap();

    let client = ClientEndpoint::<VariableMessage>::new(config, "rev.sock").unwrap();
    assert!(client.connect_blocking());

    let reply = client.send(VariableMessage::new(b"stressed", Mode::Rpc)).wait().unwrap();
    assert_eq!(reply.payload(), b"desserts");
}

/// Integration test: concurrent sends on one endpoint each get their own reply
#[test]
fn test_concurrent_sends_keep_order() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut server = ServerEndpoint::<FixedMessage>::bind(config.clone(), "order.sock", EchoHandler).unwrap();
    server.run(4).unwrap();

    let client = ClientEndpoint::<FixedMessage>::new(config.with_worker_threads(4), "order.sock").unwrap();
    assert!(client.connect_blocking());

    let pending: Vec<_> = (0..64)
        .map(|i| {
            let payload = format!("call-{}", i);
            (payload.clone(), client.send(FixedMessage::new(payload.as_bytes(), Mode::Rpc)))
        })
        .collect();

    for (payload, reply) in pending {
        assert_eq!(reply.wait().unwrap().payload(), payload.as_bytes());
    }
    assert!(wait_until(Duration::from_secs(2), || client.pending_requests() == 0));
}

/// Integration test: fire-and-forget resolves empty regardless of the handler
#[test]
fn test_fire_and_forget_resolves_empty() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let handler = move |_request: FixedMessage| {
        seen.fetch_add(1, Ordering::SeqCst);
        FixedMessage::new(b"this reply is never sent", Mode::Rpc)
    };
    let mut server = ServerEndpoint::<FixedMessage>::bind(config.clone(), "faf.sock", handler).unwrap();
    server.run(2).unwrap();

    let client = ClientEndpoint::<FixedMessage>::new(config, "faf.sock").unwrap();
    assert!(client.connect_blocking());

    let reply = client
        .send(FixedMessage::new(b"notification", Mode::FireAndForget))
        .wait()
        .unwrap();
    assert_eq!(reply.mode(), Mode::FireAndForget);
    assert_eq!(reply.payload_length(), 0);

    // A following rpc still gets its own reply, not a stray one
    let rpc = client.send(FixedMessage::new(b"rpc", Mode::Rpc)).wait().unwrap();
    assert_eq!(rpc.payload(), b"this reply is never sent");
    assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) == 2));
}

/// Integration test: unknown mode is rejected client-side
#[test]
fn test_unknown_mode_is_bad_message() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut server = ServerEndpoint::<FixedMessage>::bind(config.clone(), "bad.sock", EchoHandler).unwrap();
    server.run(1).unwrap();

    let client = ClientEndpoint::<FixedMessage>::new(config, "bad.sock").unwrap();
    assert!(client.connect_blocking());

    let result = client.send(FixedMessage::new(b"?", Mode::Unknown)).wait();
    assert!(matches!(result, Err(IpcError::BadMessage)));
    assert!(client.connected());
}

/// Integration test: connection count follows clients in and out
#[test]
fn test_connection_accounting() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut server = ServerEndpoint::<FixedMessage>::bind(config.clone(), "count.sock", EchoHandler).unwrap();
    server.run(2).unwrap();

    let clients: Vec<_> = (0..5)
        .map(|_| {
            let client = ClientEndpoint::<FixedMessage>::new(config.clone(), "count.sock").unwrap();
            assert!(client.connect_blocking());
            client
        })
        .collect();

    assert!(wait_until(Duration::from_secs(2), || server.connections() == 5));

    for client in &clients {
        client.disconnect();
        assert!(!client.connected());
    }

    assert!(wait_until(Duration::from_secs(2), || server.connections() == 0));
}

/// Integration test: disconnect resolves every outstanding call with an error
#[test]
fn test_disconnect_resolves_outstanding_sends() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let slow = |request: FixedMessage| {
        std::thread::sleep(Duration::from_millis(500));
        request
    };
    let mut server = ServerEndpoint::<FixedMessage>::bind(config.clone(), "slow.sock", slow).unwrap();
    server.run(2).unwrap();

    let client = ClientEndpoint::<FixedMessage>::new(config, "slow.sock").unwrap();
    assert!(client.connect_blocking());

    let pending: Vec<_> = (0..8)
        .map(|i| client.send(FixedMessage::new(format!("slow-{}", i).as_bytes(), Mode::Rpc)))
        .collect();
    std::thread::sleep(Duration::from_millis(50));

    client.disconnect();

    for reply in pending {
        assert!(reply.wait().is_err());
    }
    assert!(wait_until(Duration::from_secs(2), || client.pending_requests() == 0));
    assert!(!client.connected());
}

/// Integration test: calls after the server stops fail and mark the client disconnected
#[test]
fn test_server_stop_breaks_client() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut server = ServerEndpoint::<VariableMessage>::bind(config.clone(), "halt.sock", EchoHandler).unwrap();
    server.run(2).unwrap();

    let client = ClientEndpoint::<VariableMessage>::new(config, "halt.sock").unwrap();
    assert!(client.connect_blocking());
    let reply = client.send(VariableMessage::new(b"before", Mode::Rpc)).wait().unwrap();
    assert_eq!(reply.payload(), b"before");

    server.stop();
    assert_eq!(server.connections(), 0);

    assert!(client.send(VariableMessage::new(b"after", Mode::Rpc)).wait().is_err());
    assert!(!client.connected());
}

/// Integration test: connect fails with no server, then succeeds once it exists
#[test]
fn test_reconnect_after_server_starts() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let client = ClientEndpoint::<FixedMessage>::new(config.clone(), "late.sock").unwrap();
    assert!(!client.connect_blocking());
    assert!(!client.connected());

    let mut server = ServerEndpoint::<FixedMessage>::bind(config, "late.sock", EchoHandler).unwrap();
    server.run(1).unwrap();

    assert!(client.connect_blocking());
    assert!(client.connected());
    // Already connected: resolves immediately
    assert!(client.connect_blocking());

    let reply = client.send(FixedMessage::new(b"finally", Mode::Rpc)).wait().unwrap();
    assert_eq!(reply.payload(), b"finally");
}

/// Integration test: a client can reconnect after disconnecting
#[test]
fn test_connect_after_disconnect() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut server = ServerEndpoint::<FixedMessage>::bind(config.clone(), "again.sock", EchoHandler).unwrap();
    server.run(1).unwrap();

    let client = ClientEndpoint::<FixedMessage>::new(config, "again.sock").unwrap();
    assert!(client.connect_blocking());
    client.disconnect();
    assert!(matches!(
        client.send(FixedMessage::new(b"x", Mode::Rpc)).wait(),
        Err(IpcError::ConnectionAborted)
    ));

    assert!(client.connect_blocking());
    let reply = client.send(FixedMessage::new(b"back", Mode::Rpc)).wait().unwrap();
    assert_eq!(reply.payload(), b"back");
}

/// Integration test: the pending result can be awaited from another runtime
#[test]
fn test_send_awaited_from_foreign_runtime() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut server = ServerEndpoint::<FixedMessage>::bind(config.clone(), "await.sock", EchoHandler).unwrap();
    server.run(1).unwrap();

    let client = ClientEndpoint::<FixedMessage>::new(config, "await.sock").unwrap();
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

    let reply = runtime.block_on(async {
        assert!(client.connect().await);
        client.send(FixedMessage::new(b"awaited", Mode::Rpc)).await
    });
    assert_eq!(reply.unwrap().payload(), b"awaited");
}
