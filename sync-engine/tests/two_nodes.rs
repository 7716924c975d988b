//! Two sync nodes talking over an in-process pair.
//!
//! These exercise the whole stack: state machine, node task, transport,
//! storage and authentication collaborators.

use std::time::Duration;

use logsync_engine::{
    ConnectionState, Cursor, ErrorKind, LocalPair, MemoryLog, NodeConfig, NodeEvent, NodeId,
    ProtocolVersion, Reconnect, ReconnectConfig, SharedToken, Subscription, SyncNode,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn next(events: &mut Subscription<NodeEvent>) -> NodeEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for node event")
        .expect("node event hub closed")
}

/// Poll `done` until it holds.
async fn eventually(what: &str, done: impl Fn() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

async fn synchronized(node: &SyncNode) {
    tokio::time::timeout(
        Duration::from_secs(10),
        node.wait_for_state(ConnectionState::Synchronized),
    )
    .await
    .expect("timed out waiting for handshake")
    .unwrap();
}

struct Setup {
    client: SyncNode,
    server: SyncNode,
    client_log: MemoryLog,
    server_log: MemoryLog,
}

fn setup(client_config: NodeConfig, client_log: MemoryLog, server_log: MemoryLog) -> Setup {
    init_tracing();
    let pair = LocalPair::new();
    let server = SyncNode::responder(
        NodeConfig::new("server"),
        pair.right,
        server_log.clone(),
        SharedToken::new("secret"),
    );
    let client = SyncNode::initiator(client_config, pair.left, client_log.clone());
    Setup {
        client,
        server,
        client_log,
        server_log,
    }
}

fn client_config() -> NodeConfig {
    NodeConfig::new("client").with_credentials("secret")
}

// ===========================================
// Handshake
// ===========================================

#[tokio::test]
async fn handshake_reaches_synchronized() {
    let s = setup(client_config(), MemoryLog::new(), MemoryLog::new());
    let mut client_events = s.client.subscribe();

    s.server.connect().await.unwrap();
    s.client.connect().await.unwrap();
    synchronized(&s.client).await;
    synchronized(&s.server).await;

    loop {
        if let NodeEvent::Synchronized(peer) = next(&mut client_events).await {
            assert_eq!(peer.node_id, NodeId::new("server"));
            assert_eq!(peer.version, ProtocolVersion::CURRENT);
            break;
        }
    }
}

#[tokio::test]
async fn wrong_credentials_are_rejected() {
    let config = NodeConfig::new("client").with_credentials("guess");
    let s = setup(config, MemoryLog::new(), MemoryLog::new());
    let mut client_events = s.client.subscribe();
    let mut server_events = s.server.subscribe();

    s.server.connect().await.unwrap();
    s.client.connect().await.unwrap();

    loop {
        if let NodeEvent::Error(err) = next(&mut server_events).await {
            assert_eq!(err.kind, ErrorKind::WrongCredentials);
            assert!(!err.received_from_peer);
            break;
        }
    }
    loop {
        if let NodeEvent::Error(err) = next(&mut client_events).await {
            assert_eq!(err.kind, ErrorKind::WrongCredentials);
            assert!(err.received_from_peer);
            break;
        }
    }
    eventually("client to disconnect", || {
        s.client.state() == ConnectionState::Disconnected
    })
    .await;
    assert_eq!(s.server.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn different_major_version_is_rejected() {
    let config = client_config().with_version(ProtocolVersion::new(4, 0));
    let s = setup(config, MemoryLog::new(), MemoryLog::new());
    let mut client_events = s.client.subscribe();

    s.server.connect().await.unwrap();
    s.client.connect().await.unwrap();

    loop {
        if let NodeEvent::Error(err) = next(&mut client_events).await {
            assert_eq!(err.kind, ErrorKind::WrongProtocol);
            assert!(err.received_from_peer);
            break;
        }
    }
    eventually("client to disconnect", || {
        s.client.state() == ConnectionState::Disconnected
    })
    .await;
}

#[tokio::test]
async fn subprotocol_must_match() {
    init_tracing();
    let pair = LocalPair::new();
    let server = SyncNode::responder(
        NodeConfig::new("server").with_subprotocol("notes/2"),
        pair.right,
        MemoryLog::new(),
        SharedToken::new("secret"),
    );
    let client = SyncNode::initiator(
        client_config().with_subprotocol("notes/1"),
        pair.left,
        MemoryLog::new(),
    );
    let mut server_events = server.subscribe();

    server.connect().await.unwrap();
    client.connect().await.unwrap();

    loop {
        if let NodeEvent::Error(err) = next(&mut server_events).await {
            assert_eq!(err.kind, ErrorKind::WrongSubprotocol);
            break;
        }
    }
}

// ===========================================
// Entry exchange
// ===========================================

#[tokio::test]
async fn entries_flow_both_ways() {
    let s = setup(
        client_config(),
        MemoryLog::with_entries([json!("c1"), json!("c2"), json!("c3")]),
        MemoryLog::with_entries([json!("s1"), json!("s2")]),
    );

    s.server.connect().await.unwrap();
    s.client.connect().await.unwrap();

    eventually("server to apply", || s.server_log.applied().len() == 3).await;
    eventually("client to apply", || s.client_log.applied().len() == 2).await;
    assert_eq!(
        s.server_log.applied(),
        vec![json!("c1"), json!("c2"), json!("c3")]
    );
    assert_eq!(s.client_log.applied(), vec![json!("s1"), json!("s2")]);

    eventually("acknowledgements", || {
        s.client.cursors().sent() == Cursor::new(3) && s.server.cursors().sent() == Cursor::new(2)
    })
    .await;
    assert_eq!(s.server.cursors().received(), Cursor::new(3));
    assert_eq!(s.client.cursors().received(), Cursor::new(2));
}

#[tokio::test]
async fn large_log_is_sent_in_batches() {
    let entries: Vec<_> = (0..25).map(|i| json!({ "seq": i })).collect();
    let s = setup(
        client_config().with_batch_size(4),
        MemoryLog::with_entries(entries.clone()),
        MemoryLog::new(),
    );

    s.server.connect().await.unwrap();
    s.client.connect().await.unwrap();

    eventually("all batches", || s.server_log.applied().len() == 25).await;
    assert_eq!(s.server_log.applied(), entries);
}

#[tokio::test]
async fn new_local_entries_are_pushed() {
    let s = setup(client_config(), MemoryLog::new(), MemoryLog::new());
    s.server.connect().await.unwrap();
    s.client.connect().await.unwrap();
    synchronized(&s.client).await;

    s.client_log.append(json!("late"));
    s.client.notify_local_entries().unwrap();

    eventually("server to apply", || s.server_log.applied().len() == 1).await;
    assert_eq!(s.server_log.applied(), vec![json!("late")]);
}

#[tokio::test]
async fn session_resumes_without_duplicates() {
    let s = setup(
        client_config(),
        MemoryLog::with_entries([json!(1), json!(2)]),
        MemoryLog::new(),
    );
    s.server.connect().await.unwrap();
    s.client.connect().await.unwrap();
    eventually("first session", || s.client.cursors().sent() == Cursor::new(2)).await;

    s.client.disconnect().await.unwrap();
    eventually("server to see the close", || {
        s.server.state() == ConnectionState::Disconnected
    })
    .await;

    s.client_log.append(json!(3));
    s.server.connect().await.unwrap();
    s.client.connect().await.unwrap();

    eventually("second session", || s.server_log.applied().len() >= 3).await;
    // Give a duplicate resend the chance to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(s.server_log.applied(), vec![json!(1), json!(2), json!(3)]);
    assert_eq!(s.server.cursors().received(), Cursor::new(3));
}

#[tokio::test(start_paused = true)]
async fn slow_link_still_synchronizes() {
    init_tracing();
    let pair = LocalPair::with_delay(Duration::from_millis(300));
    let server_log = MemoryLog::new();
    let server = SyncNode::responder(
        NodeConfig::new("server"),
        pair.right,
        server_log.clone(),
        SharedToken::new("secret"),
    );
    let client = SyncNode::initiator(
        client_config(),
        pair.left,
        MemoryLog::with_entries([json!("x")]),
    );

    server.connect().await.unwrap();
    client.connect().await.unwrap();
    synchronized(&client).await;
    eventually("server to apply", || server_log.applied().len() == 1).await;
}

// ===========================================
// Reconnection
// ===========================================

#[tokio::test(start_paused = true)]
async fn reconnecting_client_comes_back() {
    init_tracing();
    let pair = LocalPair::new();
    let server_log = MemoryLog::new();
    let server = SyncNode::responder(
        NodeConfig::new("server"),
        pair.right,
        server_log.clone(),
        SharedToken::new("secret"),
    );
    let reconnect = Reconnect::new(
        pair.left,
        ReconnectConfig::default()
            .with_delays(Duration::from_millis(100), Duration::from_secs(1)),
    );
    let client_log = MemoryLog::with_entries([json!("a")]);
    let client = SyncNode::initiator(client_config(), reconnect, client_log.clone());

    server.connect().await.unwrap();
    client.connect().await.unwrap();
    synchronized(&client).await;
    eventually("first entry", || server_log.applied().len() == 1).await;

    // Server drops the link; the client retries until the server is back.
    server.disconnect().await.unwrap();
    eventually("client to notice", || {
        client.state() != ConnectionState::Synchronized
    })
    .await;
    client_log.append(json!("b"));
    server.connect().await.unwrap();

    synchronized(&client).await;
    client.notify_local_entries().unwrap();
    eventually("second entry", || server_log.applied().len() == 2).await;
    assert_eq!(server_log.applied(), vec![json!("a"), json!("b")]);
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_stops_reconnecting() {
    init_tracing();
    let pair = LocalPair::new();
    let server = SyncNode::responder(
        NodeConfig::new("server"),
        pair.right,
        MemoryLog::new(),
        SharedToken::new("secret"),
    );
    let reconnect = Reconnect::new(pair.left, ReconnectConfig::default());
    let client = SyncNode::initiator(client_config(), reconnect, MemoryLog::new());
    let mut client_events = client.subscribe();

    server.connect().await.unwrap();
    client.connect().await.unwrap();
    synchronized(&client).await;

    client.disconnect().await.unwrap();
    server.connect().await.ok();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    let mut saw_disconnect = false;
    while let Some(event) = client_events.try_recv() {
        if saw_disconnect {
            assert_ne!(
                event,
                NodeEvent::StateChanged(ConnectionState::Connecting),
                "client reconnected after an explicit disconnect"
            );
        }
        if matches!(event, NodeEvent::Disconnected(_)) {
            saw_disconnect = true;
        }
    }
    assert!(saw_disconnect);
}
