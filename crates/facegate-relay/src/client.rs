//! Event relay client: one persistent websocket to a collector.
//!
//! A supervisor task owns the connection lifecycle
//! (`Disconnected → Connecting → Connected → Disconnected`) and retries on a
//! fixed backoff. While connected it runs a reader and a ping watchdog; a
//! ping that cannot be written or is not answered by a pong before the next
//! one is due, a failed send, or a close from the peer drops the connection
//! and the supervisor starts over. Sends are best-effort: when
//! no connection is up the message is dropped, never queued.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("relay transport unavailable")]
    TransportUnavailable,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("write failed: {0}")]
    Write(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Collector endpoint, `ws://` or `wss://`.
    pub url: String,
    /// Pause between connection attempts.
    pub backoff: Duration,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    /// Upper bound on a single send or ping.
    pub write_timeout: Duration,
}

impl RelayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backoff: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(3),
            ping_interval: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
        }
    }
}

struct Shared {
    config: RelayConfig,
    state: watch::Sender<ConnectionState>,
    sink: Mutex<Option<WsSink>>,
    lost: Notify,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(url = %self.config.url, from = %previous, to = %next, "relay state changed");
        }
    }

    /// Drop the current connection and wake the supervisor.
    fn mark_lost(&self, sink: &mut Option<WsSink>) {
        if sink.take().is_some() {
            self.set_state(ConnectionState::Disconnected);
            self.lost.notify_waiters();
        }
    }

    async fn write(&self, message: Message) -> Result<(), RelayError> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(RelayError::TransportUnavailable);
        };

        let timeout = self.config.write_timeout;
        let result = match tokio::time::timeout(timeout, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RelayError::Write(e)),
            Err(_) => Err(RelayError::WriteTimeout(timeout)),
        };
        if result.is_err() {
            self.mark_lost(&mut guard);
        }
        result
    }
}

/// Handle to the relay client. Dropping it stops the supervisor.
pub struct EventRelay {
    shared: Arc<Shared>,
    supervisor: JoinHandle<()>,
}

impl EventRelay {
    /// Start the supervisor. Must be called from within a tokio runtime.
    pub fn spawn(config: RelayConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            config,
            state,
            sink: Mutex::new(None),
            lost: Notify::new(),
        });
        let supervisor = tokio::spawn(supervise(Arc::clone(&shared)));
        Self { shared, supervisor }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Wait until connected or `timeout` elapses. Returns whether connected.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.state.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() == ConnectionState::Connected {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Serialize `message` as JSON and write it if connected.
    pub async fn try_send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::TransportUnavailable);
        }
        let text = serde_json::to_string(message)?;
        self.shared.write(Message::Text(text)).await
    }

    /// Fire-and-forget send: failures are logged and the message is dropped.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) {
        match self.try_send(message).await {
            Ok(()) => {}
            Err(RelayError::TransportUnavailable) => {
                tracing::trace!("relay not connected, dropping event");
            }
            Err(e) => tracing::warn!(error = %e, "relay send failed, dropping event"),
        }
    }
}

impl Drop for EventRelay {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

async fn supervise(shared: Arc<Shared>) {
    let config = shared.config.clone();
    loop {
        shared.set_state(ConnectionState::Connecting);
        match tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
            Ok(Ok((ws, _))) => {
                let (sink, stream) = ws.split();
                // Registered before the sink is published so no loss signal is missed.
                let lost = shared.lost.notified();
                let (pong_tx, pong_rx) = watch::channel(Instant::now());
                *shared.sink.lock().await = Some(sink);
                shared.set_state(ConnectionState::Connected);

                tokio::select! {
                    _ = drain_incoming(stream, &pong_tx) => {
                        tracing::warn!(url = %config.url, "relay connection closed by peer");
                    }
                    _ = watchdog(&shared, pong_rx) => {
                        tracing::warn!(url = %config.url, "relay ping failed");
                    }
                    _ = lost => {}
                }

                let mut sink = shared.sink.lock().await;
                if let Some(mut old) = sink.take() {
                    let _ = old.close().await;
                }
                shared.set_state(ConnectionState::Disconnected);
            }
            Ok(Err(e)) => {
                tracing::debug!(url = %config.url, error = %e, "relay connect failed");
                shared.set_state(ConnectionState::Disconnected);
            }
            Err(_) => {
                tracing::debug!(url = %config.url, timeout = ?config.connect_timeout, "relay connect timed out");
                shared.set_state(ConnectionState::Disconnected);
            }
        }
        tokio::time::sleep(config.backoff).await;
    }
}

/// Consume inbound frames until the peer closes or the socket errors,
/// publishing the arrival time of every pong.
async fn drain_incoming(mut stream: SplitStream<WsStream>, pongs: &watch::Sender<Instant>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Pong(_)) => {
                pongs.send_replace(Instant::now());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "relay read failed");
                break;
            }
        }
    }
}

/// Ping on a fixed interval. Returns when a ping cannot be written or the
/// previous ping got no pong within one interval.
async fn watchdog(shared: &Shared, pongs: watch::Receiver<Instant>) {
    let mut ticker = tokio::time::interval(shared.config.ping_interval);
    ticker.tick().await;
    let mut unanswered: Option<Instant> = None;
    loop {
        ticker.tick().await;
        if let Some(sent) = unanswered {
            if *pongs.borrow() < sent {
                tracing::debug!(waited = ?sent.elapsed(), "relay watchdog got no pong");
                return;
            }
        }
        let sent = Instant::now();
        if let Err(e) = shared.write(Message::Ping(Vec::new())).await {
            tracing::debug!(error = %e, "relay watchdog probe failed");
            return;
        }
        unanswered = Some(sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> RelayConfig {
        // Port 9 (discard) on loopback is closed on any sane test host.
        RelayConfig {
            backoff: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(200),
            ..RelayConfig::new("ws://127.0.0.1:9/events")
        }
    }

    #[test]
    fn test_default_timings() {
        let config = RelayConfig::new("ws://collector/ws");
        assert_eq!(config.backoff, Duration::from_secs(2));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.ping_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_silent() {
        let relay = EventRelay::spawn(unreachable_config());
        relay.send(&serde_json::json!({"type": "face_event"})).await;
        assert!(matches!(
            relay.try_send(&serde_json::json!({})).await,
            Err(RelayError::TransportUnavailable)
        ));
        assert!(!relay.wait_connected(Duration::from_millis(100)).await);
    }
}
