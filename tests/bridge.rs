//! End-to-end tests for the transport bridge.
//!
//! These exercise the real loopback stack: listener, handshake line, framed
//! ping/pong, manager ownership, and the full teardown/rebuild cycle with
//! file-backed preferences and heartbeat.

use std::sync::Arc;
use std::time::Duration;

use mcp_bridge::probe::verify_endpoint;
use mcp_bridge::protocol::{framing, handshake};
use mcp_bridge::{
    BridgeConfig, FileHeartbeatWriter, HeartbeatStatus, HeartbeatWriter, JsonFileStore,
    KeyValueStore, PortAllocator, ReloadCoordinator, StdioTransportClient, TransportClient,
    TransportManager, TransportMode,
};

fn test_config() -> BridgeConfig {
    BridgeConfig {
        connect_timeout: Duration::from_millis(500),
        handshake_timeout: Duration::from_millis(1000),
        frame_timeout: Duration::from_millis(2000),
        ..BridgeConfig::default()
    }
}

/// Allocate a usable port near the requested one. Each test requests a
/// different base so parallel tests never contend for the same allocation.
async fn allocate_port(store: Arc<dyn KeyValueStore>, requested: u16) -> u16 {
    let allocator = PortAllocator::new("127.0.0.1", store);
    allocator.set_preferred_port(requested).await.unwrap()
}

fn stdio_manager(config: BridgeConfig, port: u16) -> Arc<TransportManager> {
    Arc::new(TransportManager::new(Box::new(
        move |mode| -> Arc<dyn TransportClient> {
            match mode {
                TransportMode::Stdio => Arc::new(StdioTransportClient::new(config.clone(), port)),
                TransportMode::Http => {
                    Arc::new(mcp_bridge::HttpTransportClient::new(config.clone()))
                }
            }
        },
    )))
}

#[tokio::test]
async fn bridge_serves_handshake_and_ping_pong() {
    let store: Arc<dyn KeyValueStore> = Arc::new(mcp_bridge::MemoryStore::new());
    let config = test_config();
    let port = allocate_port(store, 6500).await;

    let client = StdioTransportClient::new(config.clone(), port);
    assert!(client.start().await);

    // Raw peer view: greeting line, then framed traffic.
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let line = handshake::read_handshake_line(&mut stream, config.handshake_timeout, 512)
        .await
        .unwrap();
    assert_eq!(line, "MCP/1.0 FRAMING=1");

    framing::write_frame(&mut stream, b"ping", config.frame_timeout)
        .await
        .unwrap();
    let resp = framing::read_frame(&mut stream, config.frame_timeout)
        .await
        .unwrap();
    assert_eq!(&resp[..], b"pong");

    // Probe view: the full verification sequence.
    let report = client.verify().await;
    assert!(report.success, "{}", report.message);
    assert!(report.handshake_valid);
    assert!(report.ping_succeeded);

    client.stop().await;
}

#[tokio::test]
async fn probe_reports_connection_timeout_for_unbound_port() {
    // Bind then drop so nothing is listening on the port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = test_config();
    let start = std::time::Instant::now();
    let report = verify_endpoint(&addr, &config).await;

    assert!(!report.success);
    assert!(!report.handshake_valid);
    assert_eq!(report.message, "Connection timeout");
    // Deadline-based, not hanging: well under a second with the test config.
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn probe_rejects_non_framing_peer_without_sending_frames() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"HELLO\n").await.unwrap();

        // Count whatever the probe sends after the bad greeting.
        let mut buf = [0u8; 64];
        let seen = tokio::time::timeout(Duration::from_millis(500), stream.read(&mut buf)).await;
        let bytes_after_greeting = match seen {
            Ok(Ok(n)) => n,
            _ => 0,
        };
        let _ = seen_tx.send(bytes_after_greeting);
    });

    let report = verify_endpoint(&addr, &test_config()).await;
    assert!(!report.success);
    assert!(!report.handshake_valid);
    assert!(!report.ping_succeeded);

    // No frame was attempted against the incompatible peer.
    assert_eq!(seen_rx.await.unwrap(), 0);
}

#[tokio::test]
async fn manager_switches_modes_with_single_owner() {
    let store: Arc<dyn KeyValueStore> = Arc::new(mcp_bridge::MemoryStore::new());
    let config = test_config();
    let port = allocate_port(store, 6520).await;
    let manager = stdio_manager(config.clone(), port);

    assert!(manager.start(TransportMode::Stdio).await);
    assert_eq!(manager.active_mode().await, Some(TransportMode::Stdio));
    assert!(manager.verify().await.success);

    // Restarting the same mode releases the port first, so the second
    // listener can bind it again.
    assert!(manager.start(TransportMode::Stdio).await);
    assert_eq!(manager.active_mode().await, Some(TransportMode::Stdio));

    manager.stop().await;
    assert_eq!(manager.active_mode().await, None);
    assert!(!manager.verify().await.success);
}

#[tokio::test]
async fn reload_cycle_preserves_session_for_the_peer() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path().join("prefs.json")).unwrap());
    let heartbeat = Arc::new(FileHeartbeatWriter::new(dir.path().join("heartbeat.json")));
    let config = test_config();

    store.set_string("transport.mode", "stdio").unwrap();
    let port = allocate_port(store.clone(), 6530).await;

    let manager = stdio_manager(config.clone(), port);
    let coordinator = ReloadCoordinator::new(
        manager.clone(),
        store.clone() as Arc<dyn KeyValueStore>,
        heartbeat.clone() as Arc<dyn HeartbeatWriter>,
    );

    // Running before the reload.
    assert!(manager.start(TransportMode::Stdio).await);
    assert!(manager.verify().await.success);

    // Teardown: intent persisted, transport parked, heartbeat says reloading.
    coordinator.before_teardown().await;
    assert_eq!(store.get_bool("transport.resume.stdio"), Some(true));
    assert_eq!(manager.active_mode().await, None);

    let bytes = std::fs::read(heartbeat.path()).unwrap();
    let record: mcp_bridge::HeartbeatRecord = serde_json::from_slice(&bytes).unwrap();
    assert!(record.is_alive);
    assert_eq!(record.status, HeartbeatStatus::Reloading);

    // Rebuild: intent consumed, transport back, probe succeeds with no help
    // from the peer.
    let report = coordinator.after_rebuild().await.expect("resume expected");
    assert!(report.success, "{}", report.message);
    assert_eq!(store.get_bool("transport.resume.stdio"), None);
    assert_eq!(manager.active_mode().await, Some(TransportMode::Stdio));

    let bytes = std::fs::read(heartbeat.path()).unwrap();
    let record: mcp_bridge::HeartbeatRecord = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(record.status, HeartbeatStatus::Running);

    // A deliberate stop removes the heartbeat record entirely.
    coordinator.shutdown().await;
    assert_eq!(manager.active_mode().await, None);
    assert!(!heartbeat.path().exists());
}

#[tokio::test]
async fn port_allocation_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.json");

    let chosen = {
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        allocate_port(store, 6540).await
    };

    // A fresh session sees the same allocation without re-probing.
    let store = Arc::new(JsonFileStore::open(&path).unwrap());
    let allocator = PortAllocator::new("127.0.0.1", store as Arc<dyn KeyValueStore>);
    assert_eq!(allocator.current_port(), chosen);
}
