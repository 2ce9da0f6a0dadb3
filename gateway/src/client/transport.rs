//! Client side of the relay channel.
//!
//! One WebSocket to the relay carrying tagged binary frames and JSON control
//! messages. A connection lost without a normal close is reopened after a
//! fixed delay, indefinitely by default. Closing it on purpose, or the relay
//! closing it with code 1000, ends the session for good.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::protocol::{ControlMessage, Frame, NORMAL_CLOSURE};
use crate::core::upstream::{ReconnectDecision, ReconnectionConfig, ReconnectionController};

/// Default pause before reopening a dropped channel.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// Close code reported when the connection drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

const OUTBOUND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;
const CLOSE_GRACE_MS: u64 = 1000;
const CLIENT_CLOSED: &str = "client closed";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to relay: {0}")]
    ConnectFailed(String),

    #[error("Transport is not open")]
    NotOpen,

    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// `ws://` or `wss://` URL of the relay endpoint
    pub url: String,
    pub reconnect: ReconnectionConfig,
}

impl TransportConfig {
    /// Unbounded reconnects with the default fixed delay.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectionConfig::unbounded(Duration::from_millis(
                DEFAULT_RECONNECT_DELAY_MS,
            )),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectionConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// What the channel delivers to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The channel is open; `reconnected` is false for the first open.
    Opened { reconnected: bool },
    Frame(Frame),
    Control(ControlMessage),
    /// The channel dropped; the next attempt starts after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The channel is gone for good.
    Closed { code: u16, reason: String },
}

pub struct TransportSession {
    config: TransportConfig,
    state: Arc<RwLock<TransportState>>,
    /// Cancelled once the owner closes the channel on purpose.
    closing: CancellationToken,
    outbound: Option<mpsc::Sender<Message>>,
    events: mpsc::Sender<TransportEvent>,
    handle: Option<JoinHandle<()>>,
}

impl TransportSession {
    /// Create a closed session and the receiver its events go to.
    pub fn new(config: TransportConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CAPACITY);
        (
            Self {
                config,
                state: Arc::new(RwLock::new(TransportState::Idle)),
                closing: CancellationToken::new(),
                outbound: None,
                events,
                handle: None,
            },
            rx,
        )
    }

    pub fn state(&self) -> TransportState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Connect to the relay. Fails if the first connection cannot be made;
    /// later drops are handled by the reconnect loop.
    pub async fn open(&mut self) -> TransportResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        validate_url(&self.config.url)?;

        *self.state.write() = TransportState::Connecting;
        self.closing = CancellationToken::new();

        let ws_stream = match connect(&self.config.url).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                *self.state.write() = TransportState::Idle;
                return Err(e);
            }
        };
        info!(url = %self.config.url, "Connected to relay");

        let (tx, rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        self.outbound = Some(tx);
        *self.state.write() = TransportState::Open;
        let _ = self
            .events
            .send(TransportEvent::Opened { reconnected: false })
            .await;

        self.handle = Some(tokio::spawn(run_transport(
            ws_stream,
            rx,
            self.config.clone(),
            self.state.clone(),
            self.closing.clone(),
            self.events.clone(),
        )));
        Ok(())
    }

    /// Send PCM16 LE audio as an `AUDIO` frame.
    ///
    /// Silently dropped unless the channel is open. Returns whether the frame
    /// was queued.
    pub fn send(&self, pcm: Bytes) -> bool {
        self.send_message(Message::Binary(Frame::Audio(pcm).encode()))
    }

    /// Send a control message. Same delivery rules as [`send`](Self::send).
    pub fn send_control(&self, message: &ControlMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send_message(Message::Text(json.into())),
            Err(e) => {
                error!("Failed to serialize control message: {}", e);
                false
            }
        }
    }

    fn send_message(&self, message: Message) -> bool {
        if !self.is_open() {
            return false;
        }
        match &self.outbound {
            Some(tx) => tx.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Close the channel with a normal closure. No reconnect follows.
    pub async fn close(&mut self) -> TransportResult<()> {
        if self.handle.is_none() {
            return Err(TransportError::NotOpen);
        }
        self.closing.cancel();

        if let Some(tx) = self.outbound.take() {
            let _ = tx
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: CLIENT_CLOSED.into(),
                })))
                .await;
        }

        if let Some(mut handle) = self.handle.take()
            && tokio::time::timeout(Duration::from_millis(CLOSE_GRACE_MS), &mut handle)
                .await
                .is_err()
        {
            handle.abort();
        }

        *self.state.write() = TransportState::Closed;
        Ok(())
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.closing.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn validate_url(url: &str) -> TransportResult<()> {
    let parsed = url::Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(TransportError::InvalidUrl(format!(
            "unsupported scheme '{other}', expected ws:// or wss://"
        ))),
    }
}

async fn connect(url: &str) -> TransportResult<WsStream> {
    tokio_tungstenite::connect_async(url)
        .await
        .map(|(ws_stream, _response)| ws_stream)
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))
}

async fn dispatch(message: Message, events: &mpsc::Sender<TransportEvent>) {
    let event = match message {
        Message::Binary(data) => match Frame::decode(data) {
            Ok(frame) => TransportEvent::Frame(frame),
            Err(e) => {
                debug!("Dropping frame from relay: {}", e);
                return;
            }
        },
        Message::Text(text) => match ControlMessage::parse(text.as_str()) {
            Ok(control) => TransportEvent::Control(control),
            Err(e) => {
                debug!("Dropping control message from relay: {}", e);
                return;
            }
        },
        _ => return,
    };
    let _ = events.send(event).await;
}

/// Pump one connection, reopening it after abnormal closes.
async fn run_transport(
    ws_stream: WsStream,
    mut outbound: mpsc::Receiver<Message>,
    config: TransportConfig,
    state: Arc<RwLock<TransportState>>,
    closing: CancellationToken,
    events: mpsc::Sender<TransportEvent>,
) {
    let (mut sink, mut source) = ws_stream.split();
    let mut reconnect = ReconnectionController::new(config.reconnect.clone());

    'outer: loop {
        let (code, reason) = loop {
            tokio::select! {
                Some(message) = outbound.recv() => {
                    let is_close = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        warn!("Failed to send to relay: {}", e);
                        break (ABNORMAL_CLOSURE, e.to_string());
                    }
                    if is_close {
                        break (NORMAL_CLOSURE, CLIENT_CLOSED.to_string());
                    }
                }

                incoming = source.next() => match incoming {
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.as_str().to_string()),
                            // Closed without a status code
                            None => (1005, String::new()),
                        };
                        info!(code, %reason, "Relay closed the connection");
                        break (code, reason);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(message)) => dispatch(message, &events).await,
                    Some(Err(e)) => {
                        warn!("Relay connection error: {}", e);
                        break (ABNORMAL_CLOSURE, e.to_string());
                    }
                    None => break (ABNORMAL_CLOSURE, "connection dropped".to_string()),
                },
            }
        };

        if closing.is_cancelled() {
            *state.write() = TransportState::Closed;
            let _ = events
                .send(TransportEvent::Closed {
                    code: NORMAL_CLOSURE,
                    reason: CLIENT_CLOSED.to_string(),
                })
                .await;
            break 'outer;
        }
        if code == NORMAL_CLOSURE {
            *state.write() = TransportState::Closed;
            let _ = events.send(TransportEvent::Closed { code, reason }).await;
            break 'outer;
        }

        // Abnormal close: keep trying until a connection sticks.
        loop {
            let (attempt, delay) = match reconnect.on_failure() {
                ReconnectDecision::Retry { attempt, delay } => (attempt, delay),
                ReconnectDecision::GiveUp { .. } | ReconnectDecision::Exhausted => {
                    warn!(
                        max_attempts = config.reconnect.max_attempts,
                        "Giving up on relay connection"
                    );
                    *state.write() = TransportState::Closed;
                    let _ = events.send(TransportEvent::Closed { code, reason }).await;
                    break 'outer;
                }
            };

            *state.write() = TransportState::Reconnecting;
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to relay"
            );
            let _ = events
                .send(TransportEvent::Reconnecting { attempt, delay })
                .await;

            let reopened = tokio::select! {
                _ = closing.cancelled() => None,
                result = async {
                    tokio::time::sleep(delay).await;
                    connect(&config.url).await
                } => Some(result),
            };
            let Some(reopened) = reopened else {
                info!("Relay channel closed while reconnecting");
                *state.write() = TransportState::Closed;
                let _ = events
                    .send(TransportEvent::Closed {
                        code: NORMAL_CLOSURE,
                        reason: CLIENT_CLOSED.to_string(),
                    })
                    .await;
                break 'outer;
            };

            match reopened {
                Ok(ws_stream) => {
                    info!(attempt, "Reconnected to relay");
                    (sink, source) = ws_stream.split();
                    reconnect.on_success();

                    // Anything queued for the dead connection is stale
                    while outbound.try_recv().is_ok() {}

                    *state.write() = TransportState::Open;
                    let _ = events
                        .send(TransportEvent::Opened { reconnected: true })
                        .await;
                    continue 'outer;
                }
                Err(e) => {
                    warn!(attempt, "Reconnection to relay failed: {}", e);
                }
            }
        }
    }

    debug!("Relay transport task finished");
}
