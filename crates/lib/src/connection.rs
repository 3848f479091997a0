//! Streaming channel connection manager.
//!
//! One background task owns the WebSocket. It cycles
//! `Disconnected → Connecting → Connected → Closing → Disconnected`, forwards every inbound
//! text frame in arrival order, and after any closure or failure that was not a teardown
//! emits one "reconnecting" notification and schedules one new attempt per the
//! [`ReconnectPolicy`]. Attempts never stop until the handle is shut down.

use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::OutboundText;
use crate::signals::{Notification, Signals, RECONNECTING_MESSAGE};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// How long to wait before reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed(Duration),
    /// Delay doubles with each consecutive failure, from `initial` up to `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_secs(10))
    }
}

impl ReconnectPolicy {
    /// Delay before the reconnection that follows `failures` consecutive failures (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(d) => d,
            ReconnectPolicy::Exponential { initial, max } => {
                let shift = failures.saturating_sub(1).min(16);
                initial.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Nothing is queued: the message is dropped.
    #[error("not connected")]
    NotConnected,
    #[error("encoding outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    /// Present only while connected; each connection gets a fresh channel.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|s| {
            if *s == state {
                return false;
            }
            log::debug!("connection state {:?} -> {:?}", s, state);
            *s = state;
            true
        });
    }

    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<String>>) {
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = tx;
    }
}

/// Cloneable handle to a running connection: state, send, and teardown.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Send a user message as a `text` frame. Fails without queueing when not connected.
    pub fn send(&self, conversation_id: &str, content: &str, author: &str) -> Result<(), SendError> {
        if self.current_state() != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        let json = OutboundText::new(conversation_id, author, content).to_json()?;
        let guard = self.shared.outbound.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or(SendError::NotConnected)?;
        tx.send(json).map_err(|_| SendError::NotConnected)
    }

    /// Close the live connection and cancel any pending reconnection. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.send_replace(true) {
            log::debug!("connection shutdown requested");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shared.shutdown.borrow()
    }
}

/// Builds and starts the connection task.
pub struct ConnectionManager {
    url: String,
    policy: ReconnectPolicy,
    signals: Arc<Signals>,
}

enum Exit {
    /// Teardown requested or nobody consumes frames anymore.
    Stop,
    /// Remote closed or transport failed.
    Closed,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy, signals: Arc<Signals>) -> Self {
        Self {
            url: url.into(),
            policy,
            signals,
        }
    }

    /// Start connecting. Inbound text frames are delivered on `frames` in arrival order.
    /// The returned task ends after `shutdown` or when `frames` is closed.
    pub fn spawn(self, frames: mpsc::Sender<String>) -> (ConnectionHandle, JoinHandle<()>) {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            state,
            outbound: Mutex::new(None),
            shutdown,
        });
        let handle = ConnectionHandle {
            shared: shared.clone(),
        };
        let task = tokio::spawn(async move {
            self.run(shared, frames, shutdown_rx).await;
        });
        (handle, task)
    }

    /// Channel for inbound frames sized for bursts of stream tokens.
    pub fn frame_channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(FRAME_BUFFER)
    }

    async fn run(
        self,
        shared: Arc<Shared>,
        frames: mpsc::Sender<String>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut failures: u32 = 0;
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            shared.set_state(ConnectionState::Connecting);
            log::debug!("connecting to {}", self.url);
            let connected = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                res = tokio_tungstenite::connect_async(self.url.as_str()) => res,
            };
            match connected {
                Ok((ws, _)) => {
                    failures = 0;
                    log::info!("connected to {}", self.url);
                    if let Exit::Stop = pump(ws, &shared, &frames, &mut shutdown_rx).await {
                        break;
                    }
                }
                Err(e) => log::debug!("connect to {} failed: {}", self.url, e),
            }
            shared.set_state(ConnectionState::Disconnected);
            failures = failures.saturating_add(1);
            let delay = self.policy.delay(failures);
            log::info!("connection closed, reconnecting in {:?}", delay);
            self.signals.notify(Notification::error(RECONNECTING_MESSAGE));
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        shared.set_outbound(None);
        shared.set_state(ConnectionState::Disconnected);
        log::debug!("connection task for {} stopped", self.url);
    }
}

async fn pump(
    ws: WsStream,
    shared: &Shared,
    frames: &mpsc::Sender<String>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Exit {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    shared.set_outbound(Some(out_tx));
    shared.set_state(ConnectionState::Connected);

    let exit = loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break Exit::Stop,
            Some(text) = out_rx.recv() => {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    log::warn!("send failed: {}", e);
                    break Exit::Closed;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    if frames.send(text).await.is_err() {
                        log::debug!("frame receiver dropped, closing connection");
                        break Exit::Stop;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    log::info!("server closed the connection: {:?}", frame);
                    break Exit::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("connection error: {}", e);
                    break Exit::Closed;
                }
                None => break Exit::Closed,
            }
        }
    };

    shared.set_outbound(None);
    if let Exit::Stop = exit {
        shared.set_state(ConnectionState::Closing);
        if let Err(e) = sink.send(WsMessage::Close(None)).await {
            log::debug!("close frame not sent: {}", e);
        }
    }
    exit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_never_grows() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.delay(1), Duration::from_secs(10));
        assert_eq!(p.delay(50), Duration::from_secs(10));
    }

    #[test]
    fn exponential_policy_doubles_and_caps() {
        let p = ReconnectPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(p.delay(1), Duration::from_millis(100));
        assert_eq!(p.delay(2), Duration::from_millis(200));
        assert_eq!(p.delay(4), Duration::from_millis(800));
        assert_eq!(p.delay(5), Duration::from_secs(1));
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn send_before_connect_is_dropped() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let (frames_tx, _frames_rx) = ConnectionManager::frame_channel();
        let manager = ConnectionManager::new(
            format!("ws://127.0.0.1:{}/api/chat", port),
            ReconnectPolicy::Fixed(Duration::from_secs(60)),
            Arc::new(Signals::new()),
        );
        let (handle, task) = manager.spawn(frames_tx);
        assert!(matches!(
            handle.send("c1", "hello", "alice"),
            Err(SendError::NotConnected)
        ));
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("task stops after shutdown")
            .unwrap();
        assert_eq!(handle.current_state(), ConnectionState::Disconnected);
    }
}
