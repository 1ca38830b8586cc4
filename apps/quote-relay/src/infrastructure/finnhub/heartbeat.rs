//! Connection Liveness
//!
//! The stream is considered dead when nothing at all (data frame, ping or
//! pong) has arrived within the timeout. A monitor task asks the connection
//! loop to send WebSocket pings on an interval and reports a timeout once
//! the silence exceeds the limit.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::StreamSettings;

/// Configuration for liveness checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between outbound pings.
    pub ping_interval: Duration,
    /// Silence after which the connection is dead.
    pub idle_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from(&StreamSettings::default())
    }
}

impl From<&StreamSettings> for HeartbeatConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            idle_timeout: settings.heartbeat_timeout,
        }
    }
}

/// Requests from the monitor to the connection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a WebSocket ping.
    SendPing,
    /// The idle timeout elapsed; drop the connection.
    Timeout,
}

/// Time of the last inbound traffic on a connection.
#[derive(Debug)]
pub struct Liveness {
    last_seen: Mutex<Instant>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// Start tracking from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Record inbound traffic.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

/// Liveness monitor for one connection.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    liveness: Arc<Liveness>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        liveness: Arc<Liveness>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            liveness,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, until the connection loop goes away or until a
    /// timeout has been reported.
    pub async fn run(self) {
        let start = Instant::now() + self.config.ping_interval;
        let mut ticker = tokio::time::interval_at(start, self.config.ping_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let idle = self.liveness.idle_for();
                    let event = if idle > self.config.idle_timeout {
                        tracing::warn!(
                            idle_secs = idle.as_secs(),
                            timeout_secs = self.config.idle_timeout.as_secs(),
                            "Stream idle timeout"
                        );
                        HeartbeatEvent::Timeout
                    } else {
                        HeartbeatEvent::SendPing
                    };

                    if self.event_tx.send(event).await.is_err() || event == HeartbeatEvent::Timeout {
                        break;
                    }
                }
            }
        }
    }
}
