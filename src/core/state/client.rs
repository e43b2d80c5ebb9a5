// src/core/state/client.rs

//! Contains state definitions related to client connections: the role a session
//! plays and the handle other components use to reach it.

use crate::core::protocol::Envelope;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Every live connection, keyed by connection id, regardless of role.
pub type ClientMap = Arc<DashMap<u64, SessionHandle>>;

/// The role a session plays. Set once, on the first registration envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    Unclassified,
    Player,
    Worker,
    AdminConsole,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionRole::Unclassified => "unclassified",
            SessionRole::Player => "player",
            SessionRole::Worker => "worker",
            SessionRole::AdminConsole => "console",
        };
        f.write_str(name)
    }
}

const NO_DEADLINE: u64 = u64::MAX;

/// Lock-free liveness timestamps, written by the connection task and read by the
/// liveness monitor. Times are stored as milliseconds since the clock's origin.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
    deadline_ms: AtomicU64,
}

impl ActivityClock {
    pub fn new(window: Option<Duration>) -> Self {
        let clock = Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
            deadline_ms: AtomicU64::new(NO_DEADLINE),
        };
        clock.touch_at(clock.origin, window);
        clock
    }

    /// Records activity now and pushes the expiry deadline `window` ahead of it.
    /// `None` removes the deadline.
    pub fn touch(&self, window: Option<Duration>) {
        self.touch_at(Instant::now(), window);
    }

    pub fn touch_at(&self, now: Instant, window: Option<Duration>) {
        let now_ms = self.millis_since_origin(now);
        self.last_ms.store(now_ms, Ordering::Relaxed);
        let deadline = window
            .map(|w| now_ms.saturating_add(w.as_millis() as u64))
            .unwrap_or(NO_DEADLINE);
        self.deadline_ms.store(deadline, Ordering::Relaxed);
    }

    pub fn clear_deadline(&self) {
        self.deadline_ms.store(NO_DEADLINE, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    pub fn expiry_deadline(&self) -> Option<Instant> {
        match self.deadline_ms.load(Ordering::Relaxed) {
            NO_DEADLINE => None,
            ms => Some(self.origin + Duration::from_millis(ms)),
        }
    }

    /// True once `now` is past the expiry deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expiry_deadline().is_some_and(|deadline| now > deadline)
    }

    fn millis_since_origin(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_millis() as u64
    }
}

#[derive(Debug)]
struct HandleInner {
    conn_id: u64,
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Envelope>,
    closed: CancellationToken,
    farewell: Mutex<Option<Envelope>>,
    classification: OnceLock<(SessionRole, i64)>,
    activity: ActivityClock,
}

/// A non-owning reference to a live session.
///
/// The connection task owns the socket and the receiving end of the outbound queue.
/// Registries, the router and background tasks only ever hold handles: they can
/// enqueue envelopes and request a close, but dropping every handle never closes a
/// socket and a handle never keeps one alive.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

impl SessionHandle {
    /// Creates a handle and the outbound queue receiver for its connection task.
    /// `window` is the initial expiry window, if any.
    pub fn new(
        conn_id: u64,
        addr: SocketAddr,
        window: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = Self {
            inner: Arc::new(HandleInner {
                conn_id,
                addr,
                outbound,
                closed: CancellationToken::new(),
                farewell: Mutex::new(None),
                classification: OnceLock::new(),
                activity: ActivityClock::new(window),
            }),
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> u64 {
        self.inner.conn_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Enqueues an envelope for the connection task. Returns false if the session is
    /// closed or closing; the envelope is dropped in that case.
    pub fn send(&self, envelope: Envelope) -> bool {
        if self.inner.closed.is_cancelled() {
            return false;
        }
        self.inner.outbound.send(envelope).is_ok()
    }

    /// Asks the connection task to close. `farewell` is written before the socket is
    /// shut; anything still queued is dropped. Closing twice keeps the first farewell.
    pub fn close(&self, farewell: Option<Envelope>) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        if let Some(envelope) = farewell {
            let mut slot = self.inner.farewell.lock();
            if slot.is_none() {
                *slot = Some(envelope);
            }
        }
        self.inner.closed.cancel();
    }

    /// True once a close was requested or the connection task has gone away.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled() || self.inner.outbound.is_closed()
    }

    /// A token that is cancelled when a close is requested.
    pub fn close_token(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    pub fn take_farewell(&self) -> Option<Envelope> {
        self.inner.farewell.lock().take()
    }

    /// Records role and identity. Succeeds exactly once per session.
    pub fn classify(&self, role: SessionRole, identity: i64) -> bool {
        self.inner.classification.set((role, identity)).is_ok()
    }

    pub fn role(&self) -> SessionRole {
        self.inner
            .classification
            .get()
            .map(|(role, _)| *role)
            .unwrap_or(SessionRole::Unclassified)
    }

    pub fn identity(&self) -> Option<i64> {
        self.inner.classification.get().map(|(_, id)| *id)
    }

    pub fn activity(&self) -> &ActivityClock {
        &self.inner.activity
    }

    /// True if both handles refer to the same connection.
    pub fn same_connection(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
