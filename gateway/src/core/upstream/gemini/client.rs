//! Gemini Live client implementing the upstream capability set.
//!
//! # API Reference
//!
//! - Endpoint: `wss://generativelanguage.googleapis.com/ws/...BidiGenerateContent?key=<key>`
//! - Protocol: WebSocket with JSON messages (text or binary frames)
//! - Audio in: PCM 16-bit LE mono at the capture rate, base64 encoded
//! - Audio out: PCM 16-bit LE mono at 24kHz, base64 encoded
//!
//! Unlike the relay session, this client never reconnects on its own: a lost
//! connection is reported once through the event callback and the session
//! decides what happens next.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::config::SETUP_TIMEOUT_MS;
use super::messages::{ClientMessage, ServerMessage};
use crate::core::upstream::base::{
    BoxedUpstream, UpstreamConfig, UpstreamConnection, UpstreamConnector, UpstreamError,
    UpstreamEvent, UpstreamEventCallback, UpstreamResult,
};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `close` waits for the connection task to flush its close frame.
const CLOSE_GRACE_MS: u64 = 1000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// =============================================================================
// Connector
// =============================================================================

/// Opens Gemini Live sessions.
#[derive(Debug, Default, Clone)]
pub struct GeminiLiveConnector;

impl GeminiLiveConnector {
    pub fn new() -> Self {
        Self
    }

    /// Append the API key to the configured endpoint.
    fn build_ws_url(config: &UpstreamConfig) -> UpstreamResult<String> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                UpstreamError::InvalidConfiguration("GEMINI_API_KEY is not configured".to_string())
            })?;

        let mut url = url::Url::parse(&config.url).map_err(|e| {
            UpstreamError::InvalidConfiguration(format!("Invalid upstream URL: {e}"))
        })?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url.to_string())
    }
}

#[async_trait]
impl UpstreamConnector for GeminiLiveConnector {
    async fn open(
        &self,
        config: UpstreamConfig,
        on_event: UpstreamEventCallback,
    ) -> UpstreamResult<BoxedUpstream> {
        let url = Self::build_ws_url(&config)?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| UpstreamError::ConnectionFailed(e.to_string()))?;

        let (mut ws_sink, mut ws_source) = ws_stream.split();

        let setup = serde_json::to_string(&ClientMessage::setup(&config))
            .map_err(|e| UpstreamError::SerializationError(e.to_string()))?;
        ws_sink
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| UpstreamError::WebSocketError(e.to_string()))?;

        tokio::time::timeout(
            Duration::from_millis(SETUP_TIMEOUT_MS),
            wait_for_setup_complete(&mut ws_sink, &mut ws_source),
        )
        .await
        .map_err(|_| UpstreamError::SetupTimeout(SETUP_TIMEOUT_MS))??;

        info!(model = %config.model, "Connected to Gemini Live");

        let (tx, rx) = mpsc::channel::<ClientMessage>(WS_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));
        let intentional_close = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(run_connection(
            ws_sink,
            ws_source,
            rx,
            on_event,
            open.clone(),
            intentional_close.clone(),
        ));

        Ok(Box::new(GeminiLiveConnection {
            sender: Some(tx),
            open,
            intentional_close,
            handle: Some(handle),
            mime_type: config.input_mime_type(),
        }))
    }

    fn name(&self) -> &'static str {
        "gemini-live"
    }
}

fn parse_server_message(data: &[u8]) -> Option<ServerMessage> {
    match serde_json::from_slice::<ServerMessage>(data) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Failed to parse Gemini Live message: {}", e);
            None
        }
    }
}

async fn wait_for_setup_complete(sink: &mut WsSink, source: &mut WsSource) -> UpstreamResult<()> {
    while let Some(message) = source.next().await {
        let parsed = match message {
            Ok(Message::Text(text)) => parse_server_message(text.as_bytes()),
            Ok(Message::Binary(data)) => parse_server_message(&data),
            Ok(Message::Ping(data)) => {
                sink.send(Message::Pong(data))
                    .await
                    .map_err(|e| UpstreamError::WebSocketError(e.to_string()))?;
                continue;
            }
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .unwrap_or_else(|| "no reason given".to_string());
                return Err(UpstreamError::Closed(reason));
            }
            Ok(_) => continue,
            Err(e) => return Err(UpstreamError::WebSocketError(e.to_string())),
        };

        if parsed.is_some_and(|m| m.is_setup_complete()) {
            return Ok(());
        }
        debug!("Ignoring Gemini Live message received before setupComplete");
    }

    Err(UpstreamError::Closed(
        "stream ended before setup completed".to_string(),
    ))
}

async fn dispatch(payload: &[u8], on_event: &UpstreamEventCallback) {
    if let Some(message) = parse_server_message(payload) {
        for event in message.into_events() {
            on_event(event).await;
        }
    }
}

/// Pump outgoing messages and incoming events until either side ends.
async fn run_connection(
    mut sink: WsSink,
    mut source: WsSource,
    mut rx: mpsc::Receiver<ClientMessage>,
    on_event: UpstreamEventCallback,
    open: Arc<AtomicBool>,
    intentional_close: Arc<AtomicBool>,
) {
    let ended_by: Option<UpstreamEvent> = loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(message) => {
                    let json = match serde_json::to_string(&message) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize Gemini Live message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        break Some(UpstreamEvent::Error(e.to_string()));
                    }
                }
                None => {
                    // Every sender is gone: the connection was closed locally.
                    let _ = sink.send(Message::Close(None)).await;
                    break None;
                }
            },

            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch(text.as_bytes(), &on_event).await,
                Some(Ok(Message::Binary(data))) => dispatch(&data, &on_event).await,
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        error!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("Gemini Live closed the connection");
                    break Some(UpstreamEvent::Closed(frame.map(|f| f.reason.as_str().to_string())));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Gemini Live WebSocket error: {}", e);
                    break Some(UpstreamEvent::Error(e.to_string()));
                }
                None => break Some(UpstreamEvent::Closed(None)),
            },
        }
    };

    open.store(false, Ordering::SeqCst);

    if let Some(event) = ended_by
        && !intentional_close.load(Ordering::SeqCst)
    {
        on_event(event).await;
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Handle to one open Gemini Live session.
pub struct GeminiLiveConnection {
    sender: Option<mpsc::Sender<ClientMessage>>,
    open: Arc<AtomicBool>,
    intentional_close: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    mime_type: String,
}

impl GeminiLiveConnection {
    async fn send_message(&self, message: ClientMessage) -> UpstreamResult<()> {
        if !self.is_open() {
            return Err(UpstreamError::NotConnected);
        }
        let sender = self.sender.as_ref().ok_or(UpstreamError::NotConnected)?;
        sender
            .send(message)
            .await
            .map_err(|_| UpstreamError::NotConnected)
    }
}

#[async_trait]
impl UpstreamConnection for GeminiLiveConnection {
    async fn send_audio(&mut self, pcm: Bytes) -> UpstreamResult<()> {
        let message = ClientMessage::audio(&pcm, &self.mime_type);
        self.send_message(message).await
    }

    async fn send_stop(&mut self) -> UpstreamResult<()> {
        self.send_message(ClientMessage::audio_stream_end()).await
    }

    async fn close(&mut self) -> UpstreamResult<()> {
        self.intentional_close.store(true, Ordering::SeqCst);

        // Dropping the sender makes the task send a close frame and exit.
        self.sender = None;

        if let Some(mut handle) = self.handle.take()
            && tokio::time::timeout(Duration::from_millis(CLOSE_GRACE_MS), &mut handle)
                .await
                .is_err()
        {
            handle.abort();
        }

        self.open.store(false, Ordering::SeqCst);
        info!("Disconnected from Gemini Live");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for GeminiLiveConnection {
    fn drop(&mut self) {
        self.intentional_close.store(true, Ordering::SeqCst);
    }
}
