// src/core/reconnect.rs

//! Outbound link helpers shared by the gateway's static dialer and the worker node.

use crate::core::GatewayError;
use rand::Rng;
use std::time::Duration;
use tokio::net::TcpStream;

// The initial delay before attempting to reconnect after a link drops.
pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
// The maximum delay for the exponential backoff reconnection strategy.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
const MAX_JITTER_MS: u64 = 500;

/// Exponential reconnect delay, doubling from 1s up to 60s, with jitter so a fleet
/// of workers does not redial a restarted gateway in lockstep.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    current: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            current: INITIAL_RECONNECT_DELAY,
        }
    }
}

impl ReconnectBackoff {
    /// The wait before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..MAX_JITTER_MS));
        let wait = self.current + jitter;
        self.current = (self.current * 2).min(MAX_RECONNECT_DELAY);
        wait
    }

    pub fn reset(&mut self) {
        self.current = INITIAL_RECONNECT_DELAY;
    }

    /// The base delay the next call to `next_delay` will use.
    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Dials `addr`, giving up with `ConnectTimeout` once `timeout` has passed.
pub async fn connect_with_timeout(
    addr: &str,
    timeout: Duration,
) -> Result<TcpStream, GatewayError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(GatewayError::ConnectTimeout(addr.to_string())),
    }
}
