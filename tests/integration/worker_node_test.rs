// tests/integration/worker_node_test.rs

//! The worker node against a live gateway, in both link directions.

use super::test_helpers::{TestGateway, test_config};
use std::sync::Arc;
use tilegate::config::{DiscoveryMode, WorkerNodeConfig};
use tilegate::core::protocol::EnvelopeKind;
use tilegate::worker::{EchoEngine, GameEngine, WorkerNode};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

fn node_config(
    worker_id: i64,
    gateway_addr: Option<String>,
    listen: Option<String>,
) -> WorkerNodeConfig {
    WorkerNodeConfig {
        worker_id,
        gateway_addr,
        listen,
        connect_timeout: std::time::Duration::from_secs(1),
        max_frame_size: 32 * 1024,
        log_level: "warn".into(),
    }
}

#[tokio::test]
async fn test_dialing_worker_serves_players() {
    let gateway = TestGateway::start().await;
    let engine = Arc::new(EchoEngine::new());
    let node = WorkerNode::new(
        node_config(4, Some(gateway.addr().to_string()), None),
        engine.clone() as Arc<dyn GameEngine>,
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let node_task = tokio::spawn(node.run(shutdown_rx));

    gateway
        .wait_until("worker 4 registers", |s| s.workers.lookup_live(4).is_some())
        .await;

    let (mut player, identity) = gateway.login("walter").await;
    player.enter_room(4_000_010).await;
    player.recv_kind(EnvelopeKind::EnterRoom).await;
    assert_eq!(engine.seat_of(identity), Some(4_000_010));

    player.game_action(b"ron").await;
    let echoed = player.recv_kind(EnvelopeKind::GameAction).await;
    assert_eq!(echoed.payload, b"ron".to_vec());

    // Disconnecting releases the seat on the worker.
    drop(player);
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(3);
    while engine.seat_of(identity).is_some() {
        assert!(tokio::time::Instant::now() < deadline, "seat was never released");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let _ = shutdown_tx.send(());
    node_task.await.unwrap().unwrap();
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_console_reaches_the_worker_engine() {
    let gateway = TestGateway::start().await;
    let engine = Arc::new(EchoEngine::new());
    let node = WorkerNode::new(
        node_config(6, Some(gateway.addr().to_string()), None),
        engine.clone() as Arc<dyn GameEngine>,
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let node_task = tokio::spawn(node.run(shutdown_rx));
    gateway
        .wait_until("worker 6 registers", |s| s.workers.lookup_live(6).is_some())
        .await;

    let mut console = gateway.register_console("").await;
    console.console_command(Some(6), 77, "players").await;
    let (correlation, reply) = console.recv_console_reply().await;
    assert_eq!(correlation, Some(77));
    assert!(reply.ok);
    assert_eq!(reply.output, "0");

    let _ = shutdown_tx.send(());
    node_task.await.unwrap().unwrap();
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_static_discovery_dials_listening_worker() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let worker_addr = listener.local_addr().unwrap();
    let engine = Arc::new(EchoEngine::new());
    let node = WorkerNode::new(
        node_config(8, None, Some(worker_addr.to_string())),
        engine.clone() as Arc<dyn GameEngine>,
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let node_task = tokio::spawn(async move { node.listen_on(listener, shutdown_rx).await });

    let mut config = test_config();
    config.workers.discovery = DiscoveryMode::Static;
    config.workers.addrs = vec![worker_addr.to_string()];
    let gateway = TestGateway::with_config(config).await;

    gateway
        .wait_until("worker 8 registers over the dialed link", |s| {
            s.workers.lookup_live(8).is_some()
        })
        .await;

    let (mut player, _) = gateway.login("xena").await;
    player.game_action(b"agari").await;
    let echoed = player.recv_kind(EnvelopeKind::GameAction).await;
    assert_eq!(echoed.payload, b"agari".to_vec());

    gateway.shutdown().await;
    let _ = shutdown_tx.send(());
    node_task.await.unwrap();
}
