// tests/integration/console_test.rs

//! Admin console registration, gateway-local commands and relays to workers.

use super::test_helpers::{TestGateway, test_config};
use std::time::Duration;
use tilegate::core::protocol::{
    ConsoleCommand, ConsoleRegister, ConsoleReply, Envelope, EnvelopeKind, KickReason, StatusCode,
};

async fn gateway_with_secret() -> TestGateway {
    let mut config = test_config();
    config.console_secret = Some("s3cret".to_string());
    TestGateway::with_config(config).await
}

#[tokio::test]
async fn test_console_secret_is_checked() {
    let gateway = gateway_with_secret().await;
    let mut client = gateway.connect().await;
    client
        .send(
            Envelope::with_record(
                EnvelopeKind::ConsoleRegister,
                &ConsoleRegister {
                    secret: "wrong".into(),
                },
            )
            .unwrap(),
        )
        .await;
    client.recv_status(StatusCode::Unauthorized).await;
    assert!(gateway.state().consoles.is_empty());

    let _console = gateway.register_console("s3cret").await;
    assert_eq!(gateway.state().consoles.len(), 1);
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_local_online_command() {
    let gateway = gateway_with_secret().await;
    let _worker = gateway.register_worker(1).await;
    let (_player, _) = gateway.login("uma").await;
    let mut console = gateway.register_console("s3cret").await;

    console.console_command(None, 41, "online").await;
    let (correlation, reply) = console.recv_console_reply().await;
    assert_eq!(correlation, Some(41));
    assert!(reply.ok);
    assert_eq!(reply.output, "players=1 workers=1 consoles=1");

    console.console_command(Some(0), 42, "workers").await;
    let (correlation, reply) = console.recv_console_reply().await;
    assert_eq!(correlation, Some(42));
    assert_eq!(reply.output, "1");

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_console_kick_closes_the_player() {
    let gateway = gateway_with_secret().await;
    let mut worker = gateway.register_worker(1).await;
    let (mut player, identity) = gateway.login("victor").await;
    player.game_action(b"pon").await;
    worker.recv_kind(EnvelopeKind::GameAction).await;

    let mut console = gateway.register_console("s3cret").await;
    console
        .console_command(None, 7, &format!("kick {identity}"))
        .await;
    let (_, reply) = console.recv_console_reply().await;
    assert!(reply.ok, "{}", reply.output);

    let notice = player.recv_kickout().await;
    assert_eq!(notice.reason, KickReason::Console);
    player.expect_closed().await;

    let release = worker.recv_kickout().await;
    assert_eq!(release.player, identity);
    assert_eq!(release.reason, KickReason::Console);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_console_relay_restores_correlation() {
    let gateway = gateway_with_secret().await;
    let mut worker = gateway.register_worker(5).await;
    let mut console = gateway.register_console("s3cret").await;

    console.console_command(Some(5), 900, "seats").await;

    // The worker sees a gateway-assigned correlation, not the console's.
    let relayed = worker.recv_kind(EnvelopeKind::ConsoleCommand).await;
    let command: ConsoleCommand = relayed.decode_record().unwrap();
    assert_eq!(command.command, "seats");
    assert_eq!(relayed.addressee, None);
    let gateway_correlation = relayed.correlation.expect("relayed command is correlated");

    let reply = Envelope::with_record(
        EnvelopeKind::ConsoleReply,
        &ConsoleReply {
            ok: true,
            output: "none".into(),
        },
    )
    .unwrap()
    .correlated(gateway_correlation);
    worker.send(reply).await;

    let answer = console.recv_kind(EnvelopeKind::ConsoleReply).await;
    assert_eq!(answer.correlation, Some(900));
    assert_eq!(answer.addressee, Some(5));
    let output: ConsoleReply = answer.decode_record().unwrap();
    assert_eq!(output.output, "none");
    assert!(gateway.state().console_routes.is_empty());

    // A second reply with the same correlation has nowhere to go.
    worker
        .send(
            Envelope::with_record(
                EnvelopeKind::ConsoleReply,
                &ConsoleReply {
                    ok: true,
                    output: "dup".into(),
                },
            )
            .unwrap()
            .correlated(gateway_correlation),
        )
        .await;
    console.expect_silence(Duration::from_millis(200)).await;

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_console_relay_to_offline_worker() {
    let gateway = gateway_with_secret().await;
    let mut console = gateway.register_console("s3cret").await;

    console.console_command(Some(12), 3, "seats").await;
    let answer = console.recv_kind(EnvelopeKind::Status).await;
    assert_eq!(answer.correlation, Some(3));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_console_broadcast_reaches_players() {
    let gateway = gateway_with_secret().await;
    let (mut player, _) = gateway.login("wendy").await;
    let mut console = gateway.register_console("s3cret").await;

    console
        .send(Envelope::new(EnvelopeKind::Broadcast, b"maintenance".to_vec()).correlated(8))
        .await;
    let status = console.recv_kind(EnvelopeKind::Status).await;
    assert_eq!(status.correlation, Some(8));

    let notice = player.recv_kind(EnvelopeKind::Broadcast).await;
    assert_eq!(notice.payload, b"maintenance".to_vec());

    gateway.shutdown().await;
}
