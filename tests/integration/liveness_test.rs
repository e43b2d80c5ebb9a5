// tests/integration/liveness_test.rs

//! Idle expiry driven by the background liveness monitor.

use super::test_helpers::{TestGateway, test_config};
use std::time::Duration;
use tilegate::core::protocol::{EnvelopeKind, KickReason, StatusCode};

async fn fast_expiry_gateway() -> TestGateway {
    let mut config = test_config();
    config.liveness.idle_timeout = Duration::from_millis(400);
    config.liveness.sweep_interval = Duration::from_millis(50);
    TestGateway::with_config(config).await
}

#[tokio::test]
async fn test_idle_player_is_expired_and_released() {
    let gateway = fast_expiry_gateway().await;
    let mut worker = gateway.register_worker(1).await;
    let (mut player, identity) = gateway.login("xavier").await;
    player.game_action(b"kan").await;
    worker.recv_kind(EnvelopeKind::GameAction).await;

    let notice = player.recv_kickout().await;
    assert_eq!(notice.reason, KickReason::Idle);
    player.expect_closed().await;

    let release = worker.recv_kickout().await;
    assert_eq!(release.player, identity);
    assert_eq!(release.reason, KickReason::Idle);
    assert!(gateway.state().players.lookup(identity).is_none());
    assert!(gateway.state().stats.get_total_expired() >= 1);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_heartbeats_keep_a_player_alive() {
    let gateway = fast_expiry_gateway().await;
    let (mut player, identity) = gateway.login("yvonne").await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        player.heartbeat().await;
    }
    assert!(gateway.state().players.lookup_live(identity).is_some());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_silent_unclassified_connection_is_closed() {
    let gateway = fast_expiry_gateway().await;
    let mut lurker = gateway.connect().await;

    lurker.recv_status(StatusCode::NotRegistered).await;
    lurker.expect_closed().await;

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_registered_worker_is_never_expired() {
    let gateway = fast_expiry_gateway().await;
    let mut worker = gateway.register_worker(1).await;

    tokio::time::sleep(Duration::from_millis(800)).await;
    worker.heartbeat().await;
    assert!(gateway.state().workers.lookup_live(1).is_some());

    gateway.shutdown().await;
}
