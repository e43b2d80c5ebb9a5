// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests: an in-process gateway on an
//! ephemeral port and raw framed clients that speak the wire protocol.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tilegate::config::Config;
use tilegate::core::protocol::{
    ConsoleCommand, ConsoleRegister, ConsoleReply, EnterRoom, Envelope, EnvelopeCodec,
    EnvelopeKind, InboundFrame, Kickout, LoginReply, LoginRequest, Status, StatusCode,
    WorkerRegister,
};
use tilegate::core::state::ServerState;
use tilegate::server::{self, ServerHandle};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, reload};

/// How long a test waits for an expected envelope before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Sets up minimal tracing for tests (ignores the error if already initialized).
pub fn init_tracing() {
    let env_filter = EnvFilter::new("warn");
    let (filter, _reload_handle) = reload::Layer::new(env_filter);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A configuration suitable for tests: loopback, ephemeral port, two I/O workers.
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        io_workers: 2,
        ..Config::default()
    }
}

/// TestGateway runs a complete gateway in the background of the test runtime.
pub struct TestGateway {
    handle: ServerHandle,
}

impl TestGateway {
    /// Starts a gateway with the default test configuration.
    pub async fn start() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        init_tracing();
        let handle = server::spawn(config)
            .await
            .expect("Failed to start test gateway");
        Self { handle }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.handle.state
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr
    }

    /// Opens a raw, unclassified connection.
    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.addr()).await
    }

    /// Connects and logs in; returns the client and the identity it was given.
    pub async fn login(&self, account: &str) -> (TestClient, i64) {
        let mut client = self.connect().await;
        let identity = client.login(account).await;
        (client, identity)
    }

    /// Connects and registers as worker `worker_id`, waiting for the ack.
    pub async fn register_worker(&self, worker_id: i64) -> TestClient {
        let mut client = self.connect().await;
        client
            .send(
                Envelope::with_record(EnvelopeKind::WorkerRegister, &WorkerRegister { worker_id })
                    .unwrap(),
            )
            .await;
        let ack = client.recv().await;
        assert_eq!(ack.kind().unwrap(), EnvelopeKind::WorkerRegisterAck);
        client
    }

    /// Connects and registers as an admin console.
    pub async fn register_console(&self, secret: &str) -> TestClient {
        let mut client = self.connect().await;
        client
            .send(
                Envelope::with_record(
                    EnvelopeKind::ConsoleRegister,
                    &ConsoleRegister {
                        secret: secret.to_string(),
                    },
                )
                .unwrap(),
            )
            .await;
        let ack = client.recv().await;
        assert_eq!(ack.kind().unwrap(), EnvelopeKind::ConsoleRegisterAck);
        client
    }

    /// Polls `condition` against the gateway state until it holds or the timeout hits.
    pub async fn wait_until(&self, what: &str, condition: impl Fn(&ServerState) -> bool) {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while !condition(self.state().as_ref()) {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting until {what}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}

/// A raw protocol client.
pub struct TestClient {
    framed: Framed<TcpStream, EnvelopeCodec>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to connect to test gateway");
        Self {
            framed: Framed::new(stream, EnvelopeCodec::default()),
        }
    }

    pub async fn send(&mut self, envelope: Envelope) {
        self.framed
            .send(envelope)
            .await
            .expect("Failed to send envelope");
    }

    /// Writes bytes straight to the socket, bypassing the codec.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.expect("Failed to write raw bytes");
        stream.flush().await.expect("Failed to flush raw bytes");
    }

    /// The next envelope, failing the test on timeout, close, or a malformed frame.
    pub async fn recv(&mut self) -> Envelope {
        match tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(InboundFrame::Envelope(envelope)))) => envelope,
            Ok(Some(Ok(InboundFrame::Malformed { reason, .. }))) => {
                panic!("received a malformed frame: {reason}")
            }
            Ok(Some(Err(e))) => panic!("connection error: {e}"),
            Ok(None) => panic!("connection closed while waiting for an envelope"),
            Err(_) => panic!("timed out waiting for an envelope"),
        }
    }

    /// The next envelope, which must be of `kind`.
    pub async fn recv_kind(&mut self, kind: EnvelopeKind) -> Envelope {
        let envelope = self.recv().await;
        assert_eq!(
            envelope.kind().unwrap(),
            kind,
            "unexpected envelope: {envelope:?}"
        );
        envelope
    }

    /// The next envelope, which must be a `Status` with `code`.
    pub async fn recv_status(&mut self, code: StatusCode) -> Status {
        let status: Status = self
            .recv_kind(EnvelopeKind::Status)
            .await
            .decode_record()
            .unwrap();
        assert_eq!(status.code, code, "unexpected status: {status:?}");
        status
    }

    pub async fn recv_kickout(&mut self) -> Kickout {
        self.recv_kind(EnvelopeKind::Kickout)
            .await
            .decode_record()
            .unwrap()
    }

    /// Asserts that nothing arrives for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(frame) = tokio::time::timeout(window, self.framed.next()).await {
            panic!("expected silence, got {frame:?}");
        }
    }

    /// Asserts that the gateway closes the connection, skipping any farewell.
    pub async fn expect_closed(&mut self) {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.framed.next()).await {
                Ok(None) | Ok(Some(Err(_))) => return,
                Ok(Some(Ok(_))) => continue,
                Err(_) => panic!("timed out waiting for the connection to close"),
            }
        }
    }

    pub async fn login(&mut self, account: &str) -> i64 {
        self.send(
            Envelope::with_record(
                EnvelopeKind::Login,
                &LoginRequest {
                    account: account.to_string(),
                    token: format!("{account}-token"),
                },
            )
            .unwrap(),
        )
        .await;
        let reply: LoginReply = self
            .recv_kind(EnvelopeKind::LoginReply)
            .await
            .decode_record()
            .unwrap();
        reply.identity
    }

    pub async fn heartbeat(&mut self) {
        self.send(Envelope::heartbeat()).await;
        self.recv_kind(EnvelopeKind::Heartbeat).await;
    }

    pub async fn enter_room(&mut self, room_id: i64) {
        self.send(Envelope::with_record(EnvelopeKind::EnterRoom, &EnterRoom { room_id }).unwrap())
            .await;
    }

    pub async fn game_action(&mut self, payload: &[u8]) {
        self.send(Envelope::new(EnvelopeKind::GameAction, payload.to_vec()))
            .await;
    }

    /// Sends a console command. `target` of `None` runs it on the gateway.
    pub async fn console_command(&mut self, target: Option<i64>, correlation: u64, command: &str) {
        let mut envelope = Envelope::with_record(
            EnvelopeKind::ConsoleCommand,
            &ConsoleCommand {
                command: command.to_string(),
            },
        )
        .unwrap()
        .correlated(correlation);
        envelope.addressee = target;
        self.send(envelope).await;
    }

    pub async fn recv_console_reply(&mut self) -> (Option<u64>, ConsoleReply) {
        let envelope = self.recv_kind(EnvelopeKind::ConsoleReply).await;
        (envelope.correlation, envelope.decode_record().unwrap())
    }
}
