// tests/integration/routing_test.rs

//! Player ↔ worker forwarding, worker hand-off and broadcast.

use super::test_helpers::TestGateway;
use std::time::Duration;
use tilegate::core::protocol::{Envelope, EnvelopeKind, KickReason, StatusCode};

#[tokio::test]
async fn test_login_forward_and_reply_round_trip() {
    let gateway = TestGateway::start().await;
    let mut worker = gateway.register_worker(1).await;
    let (mut player, identity) = gateway.login("mallory").await;

    player.game_action(b"pong 3p").await;
    let forwarded = worker.recv_kind(EnvelopeKind::GameAction).await;
    assert_eq!(forwarded.addressee, Some(identity));
    assert_eq!(forwarded.payload, b"pong 3p".to_vec());

    worker
        .send(Envelope::new(EnvelopeKind::GameAction, b"ok".to_vec()).addressed_to(identity))
        .await;
    let reply = player.recv_kind(EnvelopeKind::GameAction).await;
    assert_eq!(reply.payload, b"ok".to_vec());
    assert_eq!(reply.addressee, None);

    assert_eq!(
        gateway.state().store.load_affinity(identity).unwrap(),
        Some(1)
    );
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_no_worker_available() {
    let gateway = TestGateway::start().await;
    let (mut player, _) = gateway.login("niaj").await;

    player.game_action(b"draw").await;
    player.recv_status(StatusCode::NoWorkerAvailable).await;

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_enter_room_on_another_worker_hands_off() {
    let gateway = TestGateway::start().await;
    let mut first = gateway.register_worker(1).await;
    let (mut player, identity) = gateway.login("olivia").await;

    // Pin the player to worker 1 with a room it hosts.
    player.enter_room(1_000_001).await;
    first.recv_kind(EnvelopeKind::EnterRoom).await;

    let mut second = gateway.register_worker(2).await;
    player.enter_room(2_000_005).await;

    // The old worker is released before the new one sees the player.
    let release = first.recv_kickout().await;
    assert_eq!(release.player, identity);
    assert_eq!(release.reason, KickReason::Reassigned);
    let entered = second.recv_kind(EnvelopeKind::EnterRoom).await;
    assert_eq!(entered.addressee, Some(identity));

    // Subsequent actions stick to the new worker.
    player.game_action(b"riichi").await;
    second.recv_kind(EnvelopeKind::GameAction).await;
    first.expect_silence(Duration::from_millis(200)).await;

    assert_eq!(gateway.state().stats.get_total_handoffs(), 1);
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_enter_room_on_offline_worker_is_target_offline() {
    let gateway = TestGateway::start().await;
    let _worker = gateway.register_worker(1).await;
    let (mut player, _) = gateway.login("peggy").await;

    player.enter_room(9_000_000).await;
    let status = player.recv_status(StatusCode::TargetOffline).await;
    assert!(status.detail.contains('9'));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_worker_disconnect_removes_it_from_candidates() {
    let gateway = TestGateway::start().await;
    let first = gateway.register_worker(1).await;
    let mut second = gateway.register_worker(2).await;

    drop(first);
    gateway
        .wait_until("worker 1 is unregistered", |s| s.workers.lookup(1).is_none())
        .await;

    for n in 0..5 {
        let (mut player, identity) = gateway.login(&format!("player-{n}")).await;
        player.game_action(b"tsumo").await;
        let forwarded = second.recv_kind(EnvelopeKind::GameAction).await;
        assert_eq!(forwarded.addressee, Some(identity));
    }

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_player_disconnect_releases_worker() {
    let gateway = TestGateway::start().await;
    let mut worker = gateway.register_worker(3).await;
    let (mut player, identity) = gateway.login("quentin").await;
    player.game_action(b"chi").await;
    worker.recv_kind(EnvelopeKind::GameAction).await;

    drop(player);
    let release = worker.recv_kickout().await;
    assert_eq!(release.player, identity);
    assert_eq!(release.reason, KickReason::Disconnect);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_worker_envelope_for_offline_player_is_dropped() {
    let gateway = TestGateway::start().await;
    let mut worker = gateway.register_worker(1).await;

    worker
        .send(Envelope::new(EnvelopeKind::GameAction, b"late".to_vec()).addressed_to(77_777))
        .await;
    worker.expect_silence(Duration::from_millis(200)).await;
    worker.heartbeat().await;

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_broadcast_survives_a_departed_player() {
    let gateway = TestGateway::start().await;
    let mut worker = gateway.register_worker(1).await;
    let (mut stays, _) = gateway.login("rupert").await;
    let (leaves, _) = gateway.login("sybil").await;
    let (mut also_stays, _) = gateway.login("trent").await;

    // Close one socket without waiting for the gateway to notice.
    drop(leaves);

    worker
        .send(Envelope::new(EnvelopeKind::Broadcast, b"table 4 opens".to_vec()))
        .await;
    let seen = stays.recv_kind(EnvelopeKind::Broadcast).await;
    assert_eq!(seen.payload, b"table 4 opens".to_vec());
    let seen = also_stays.recv_kind(EnvelopeKind::Broadcast).await;
    assert_eq!(seen.payload, b"table 4 opens".to_vec());

    worker.heartbeat().await;
    gateway.shutdown().await;
}
