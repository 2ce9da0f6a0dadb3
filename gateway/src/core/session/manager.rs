//! Relay session: the per-connection state machine.
//!
//! A [`RelaySession`] is driven by a single task ([`RelaySession::run`]) that
//! multiplexes client frames, upstream events, the idle deadline and a
//! shutdown token. Nothing else touches its state, so the callbacks of one
//! session never interleave with each other.
//!
//! Upstream opens run in a spawned task and report back through the session's
//! own event channel. Every open gets a fresh generation number; events tagged
//! with an older generation belong to a connection that was already given up
//! on and are ignored.
//!
//! The event channel is bounded. The run loop drains it before reading more
//! client frames, so a busy upstream slows the client side down instead of
//! queueing without limit.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::SessionState;
use crate::core::protocol::{ControlMessage, Frame, NORMAL_CLOSURE, ProtocolError};
use crate::core::upstream::{
    BoxedUpstream, ReconnectDecision, ReconnectionConfig, ReconnectionController, UpstreamConfig,
    UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamEventCallback,
};
use crate::errors::{RelayError, RelayResult};

pub const STATUS_CONNECTED: &str = "Connected to speech service";
pub const STATUS_RECONNECTED: &str = "Reconnected to speech service";

/// Capacity of the per-session channel carrying upstream events and open results.
pub const EVENT_BUFFER_SIZE: usize = 256;

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// No traffic in either direction for this long closes the session.
    pub idle_timeout: Duration,
    pub reconnection: ReconnectionConfig,
    /// Close the client channel once reconnection gives up.
    pub close_on_upstream_exhausted: bool,
    pub upstream: UpstreamConfig,
}

/// Traffic read from the client channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientInbound {
    Binary(Bytes),
    Text(String),
    /// The client closed the channel.
    Disconnected,
    /// The channel failed.
    Error(String),
}

/// Traffic written to the client channel, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageRoute {
    Control(ControlMessage),
    Binary(Bytes),
    Close { code: u16, reason: String },
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnected,
    ClientError,
    /// Writing to the client failed.
    ChannelClosed,
    IdleTimeout,
    UpstreamExhausted,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientDisconnected => "client disconnected",
            CloseReason::ClientError => "client channel error",
            CloseReason::ChannelClosed => "client channel closed",
            CloseReason::IdleTimeout => "session timed out",
            CloseReason::UpstreamExhausted => "speech service unavailable",
            CloseReason::Shutdown => "server shutting down",
        }
    }

    /// Whether the client channel is still there to receive a close frame.
    fn client_reachable(&self) -> bool {
        !matches!(
            self,
            CloseReason::ClientDisconnected | CloseReason::ClientError | CloseReason::ChannelClosed
        )
    }
}

enum SessionEvent {
    Upstream {
        generation: u64,
        event: UpstreamEvent,
    },
    Opened {
        generation: u64,
        connection: BoxedUpstream,
    },
    OpenFailed {
        generation: u64,
        error: UpstreamError,
    },
}

/// One client connection's relay state.
pub struct RelaySession {
    id: Uuid,
    config: SessionConfig,
    connector: Arc<dyn UpstreamConnector>,
    outbound: mpsc::Sender<MessageRoute>,

    state: SessionState,
    upstream: Option<BoxedUpstream>,
    generation: u64,
    reconnect: ReconnectionController,
    ever_connected: bool,
    open_task: Option<JoinHandle<()>>,
    /// Events the connection emitted before its open call returned.
    early_events: Vec<UpstreamEvent>,
    /// The pending open was started by client audio after a give-up.
    user_retry: bool,
    idle_deadline: Instant,
    close_reason: Option<CloseReason>,

    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
}

impl RelaySession {
    pub fn new(
        id: Uuid,
        config: SessionConfig,
        connector: Arc<dyn UpstreamConnector>,
        outbound: mpsc::Sender<MessageRoute>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let reconnect = ReconnectionController::new(config.reconnection.clone());
        let idle_deadline = Instant::now() + config.idle_timeout;

        Self {
            id,
            config,
            connector,
            outbound,
            state: SessionState::Idle,
            upstream: None,
            generation: 0,
            reconnect,
            ever_connected: false,
            open_task: None,
            early_events: Vec::new(),
            user_retry: false,
            idle_deadline,
            close_reason: None,
            events_tx,
            events_rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until it closes and return why it closed.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ClientInbound>,
        shutdown: CancellationToken,
    ) -> CloseReason {
        info!(session_id = %self.id, "Relay session started");

        while !self.state.is_closed() {
            let idle_deadline = self.idle_deadline;

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.cleanup(CloseReason::Shutdown).await;
                }

                Some(event) = self.events_rx.recv() => {
                    let result = self.handle_session_event(event).await;
                    self.settle(result).await;
                }

                message = inbound.recv() => match message {
                    Some(ClientInbound::Binary(data)) => {
                        let result = self.handle_client_binary(data).await;
                        self.settle(result).await;
                    }
                    Some(ClientInbound::Text(text)) => {
                        let result = self.handle_client_text(&text).await;
                        self.settle(result).await;
                    }
                    Some(ClientInbound::Error(e)) => {
                        warn!(session_id = %self.id, "Client channel error: {}", e);
                        self.cleanup(CloseReason::ClientError).await;
                    }
                    Some(ClientInbound::Disconnected) | None => {
                        self.cleanup(CloseReason::ClientDisconnected).await;
                    }
                },

                _ = tokio::time::sleep_until(idle_deadline) => {
                    self.on_idle_timeout().await;
                }
            }
        }

        self.close_reason.unwrap_or(CloseReason::ClientDisconnected)
    }

    /// Log recoverable errors; close on fatal ones.
    async fn settle(&mut self, result: RelayResult<()>) {
        match result {
            Ok(()) => {}
            Err(RelayError::Protocol(e)) => {
                debug!(session_id = %self.id, "Dropping frame: {}", e);
            }
            Err(e) if e.is_fatal() => {
                warn!(session_id = %self.id, "{}", e);
                self.cleanup(CloseReason::ChannelClosed).await;
            }
            Err(e) => {
                warn!(session_id = %self.id, "{}", e);
            }
        }
    }

    // =========================================================================
    // Client → relay
    // =========================================================================

    async fn handle_client_binary(&mut self, data: Bytes) -> RelayResult<()> {
        self.touch();

        match Frame::decode(data)? {
            Frame::Audio(pcm) => self.handle_client_audio(pcm).await,
            // Interruptions from the client travel as control messages.
            other => Err(ProtocolError::UnexpectedFrame(other.tag()).into()),
        }
    }

    async fn handle_client_text(&mut self, text: &str) -> RelayResult<()> {
        self.touch();

        match ControlMessage::parse(text)? {
            ControlMessage::Interruption { .. } => {
                info!(session_id = %self.id, state = %self.state, "Client requested interruption");
                self.interrupt().await
            }
            other => {
                debug!(session_id = %self.id, message = ?other, "Ignoring client control message");
                Ok(())
            }
        }
    }

    async fn handle_client_audio(&mut self, pcm: Bytes) -> RelayResult<()> {
        match self.state {
            SessionState::Closed => Ok(()),
            SessionState::Idle => {
                if self.reconnect.is_exhausted() {
                    // Automatic retries are spent; the client asked again.
                    info!(session_id = %self.id, "Client audio after give-up, trying the speech service once more");
                    self.user_retry = true;
                }
                self.begin_connect(None);
                Ok(())
            }
            SessionState::Connecting => {
                debug!(session_id = %self.id, bytes = pcm.len(), "Upstream not ready, dropping audio");
                Ok(())
            }
            SessionState::Speaking => {
                // Barge-in: stop local playback first, then the upstream reply.
                self.interrupt().await?;
                self.forward_audio(pcm).await
            }
            SessionState::Ready => self.forward_audio(pcm).await,
        }
    }

    async fn forward_audio(&mut self, pcm: Bytes) -> RelayResult<()> {
        if pcm.is_empty() {
            return Ok(());
        }
        let Some(upstream) = self.upstream.as_mut() else {
            return Ok(());
        };
        if let Err(e) = upstream.send_audio(pcm).await {
            return self.handle_upstream_failure(e.to_string()).await;
        }
        Ok(())
    }

    /// Send `INTERRUPTION` to the client, then the stop signal upstream.
    async fn interrupt(&mut self) -> RelayResult<()> {
        self.deliver(MessageRoute::Binary(Frame::Interruption.encode()))
            .await?;

        if let Some(upstream) = self.upstream.as_mut()
            && let Err(e) = upstream.send_stop().await
        {
            return self.handle_upstream_failure(e.to_string()).await;
        }

        if self.state == SessionState::Speaking {
            self.set_state(SessionState::Ready);
        }
        Ok(())
    }

    // =========================================================================
    // Upstream → relay
    // =========================================================================

    async fn handle_session_event(&mut self, event: SessionEvent) -> RelayResult<()> {
        match event {
            SessionEvent::Opened {
                generation,
                connection,
            } => self.on_upstream_opened(generation, connection).await,
            SessionEvent::OpenFailed { generation, error } => {
                if generation != self.generation || self.state.is_closed() {
                    return Ok(());
                }
                self.open_task = None;
                self.handle_upstream_failure(error.to_string()).await
            }
            SessionEvent::Upstream { generation, event } => {
                if generation != self.generation || self.state.is_closed() {
                    debug!(session_id = %self.id, ?event, "Ignoring event from stale upstream connection");
                    return Ok(());
                }
                if !self.state.has_upstream() {
                    // The open call has not returned yet.
                    if event.is_terminal() {
                        return self.handle_upstream_event(event).await;
                    }
                    self.early_events.push(event);
                    return Ok(());
                }
                self.handle_upstream_event(event).await
            }
        }
    }

    async fn on_upstream_opened(
        &mut self,
        generation: u64,
        mut connection: BoxedUpstream,
    ) -> RelayResult<()> {
        if generation != self.generation || self.state.is_closed() {
            let _ = connection.close().await;
            return Ok(());
        }

        self.open_task = None;
        self.upstream = Some(connection);
        self.reconnect.on_success();
        self.user_retry = false;
        self.set_state(SessionState::Ready);
        self.touch();

        let status = if self.ever_connected {
            STATUS_RECONNECTED
        } else {
            STATUS_CONNECTED
        };
        self.ever_connected = true;
        info!(session_id = %self.id, connector = self.connector.name(), "Upstream connection ready");

        self.deliver(MessageRoute::Control(ControlMessage::status(status)))
            .await?;

        for event in std::mem::take(&mut self.early_events) {
            if self.generation != generation {
                break;
            }
            self.handle_upstream_event(event).await?;
        }
        Ok(())
    }

    async fn handle_upstream_event(&mut self, event: UpstreamEvent) -> RelayResult<()> {
        match event {
            UpstreamEvent::Audio(pcm) => {
                if pcm.is_empty() {
                    debug!(session_id = %self.id, "Dropping empty upstream audio payload");
                    return Ok(());
                }
                self.touch();
                if self.state == SessionState::Ready {
                    self.set_state(SessionState::Speaking);
                }
                self.deliver(MessageRoute::Binary(Frame::Audio(pcm).encode()))
                    .await
            }
            UpstreamEvent::TurnComplete => {
                self.touch();
                if self.state == SessionState::Speaking {
                    self.set_state(SessionState::Ready);
                }
                self.deliver(MessageRoute::Binary(Frame::TurnComplete.encode()))
                    .await
            }
            UpstreamEvent::Interrupted => {
                self.touch();
                if self.state == SessionState::Speaking {
                    self.set_state(SessionState::Ready);
                }
                self.deliver(MessageRoute::Binary(Frame::Interruption.encode()))
                    .await
            }
            UpstreamEvent::Error(message) => self.handle_upstream_failure(message).await,
            UpstreamEvent::Closed(reason) => {
                self.handle_upstream_failure(
                    reason.unwrap_or_else(|| "connection closed".to_string()),
                )
                .await
            }
        }
    }

    // =========================================================================
    // Reconnection
    // =========================================================================

    async fn handle_upstream_failure(&mut self, reason: String) -> RelayResult<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        warn!(session_id = %self.id, state = %self.state, "Upstream connection lost: {}", reason);

        // Events still queued from the failed connection are now stale.
        self.generation += 1;
        self.early_events.clear();
        if let Some(mut upstream) = self.upstream.take() {
            let _ = upstream.close().await;
        }

        if std::mem::take(&mut self.user_retry) {
            // One attempt per client request; no automatic retries.
            self.set_state(SessionState::Idle);
            let notice = ControlMessage::error(format!("Speech service still unavailable: {reason}"));
            return self.deliver(MessageRoute::Control(notice)).await;
        }

        match self.reconnect.on_failure() {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    session_id = %self.id,
                    attempt,
                    max_attempts = self.reconnect.config().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling upstream reconnection"
                );
                self.begin_connect(Some(delay));
                Ok(())
            }
            ReconnectDecision::GiveUp { attempts } => {
                error!(session_id = %self.id, attempts, "Upstream reconnection attempts exhausted");
                self.set_state(SessionState::Idle);

                let notice = ControlMessage::error(format!(
                    "Speech service unavailable after {attempts} reconnection attempts"
                ));
                let delivered = self.deliver(MessageRoute::Control(notice)).await;

                if self.config.close_on_upstream_exhausted {
                    self.cleanup(CloseReason::UpstreamExhausted).await;
                }
                delivered
            }
            ReconnectDecision::Exhausted => {
                self.set_state(SessionState::Idle);
                Ok(())
            }
        }
    }

    /// Open an upstream connection in the background, optionally after a delay.
    fn begin_connect(&mut self, delay: Option<Duration>) {
        self.generation += 1;
        let generation = self.generation;
        self.early_events.clear();
        self.set_state(SessionState::Connecting);

        if let Some(task) = self.open_task.take() {
            task.abort();
        }

        let connector = self.connector.clone();
        let config = self.config.upstream.clone();
        let events = self.events_tx.clone();
        let on_event = self.upstream_callback(generation);
        let session_id = self.id;

        self.open_task = Some(tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            debug!(session_id = %session_id, connector = connector.name(), "Opening upstream connection");

            let event = match connector.open(config, on_event).await {
                Ok(connection) => SessionEvent::Opened {
                    generation,
                    connection,
                },
                Err(error) => SessionEvent::OpenFailed { generation, error },
            };

            // The session is gone; don't leak the connection.
            if let Err(mpsc::error::SendError(SessionEvent::Opened { mut connection, .. })) =
                events.send(event).await
            {
                let _ = connection.close().await;
            }
        }));
    }

    fn upstream_callback(&self, generation: u64) -> UpstreamEventCallback {
        let events = self.events_tx.clone();
        Arc::new(move |event| {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(SessionEvent::Upstream { generation, event }).await;
            })
        })
    }

    // =========================================================================
    // Timeout and cleanup
    // =========================================================================

    async fn on_idle_timeout(&mut self) {
        let timeout = RelayError::Timeout(self.config.idle_timeout);
        info!(session_id = %self.id, state = %self.state, "{}, closing", timeout);

        let notice = ControlMessage::session_timeout(format!(
            "Session closed after {} seconds of inactivity",
            self.config.idle_timeout.as_secs()
        ));
        let _ = self.deliver(MessageRoute::Control(notice)).await;
        self.cleanup(CloseReason::IdleTimeout).await;
    }

    /// Tear the session down. Only the first call has any effect; returns
    /// whether this call performed the cleanup.
    pub async fn cleanup(&mut self, reason: CloseReason) -> bool {
        if self.state.is_closed() {
            return false;
        }

        let previous = self.state;
        self.state = SessionState::Closed;
        self.close_reason = Some(reason);
        self.generation += 1;
        self.early_events.clear();

        if let Some(task) = self.open_task.take() {
            task.abort();
        }

        if let Some(mut upstream) = self.upstream.take()
            && let Err(e) = upstream.close().await
        {
            warn!(session_id = %self.id, "Failed to close upstream connection: {}", e);
        }

        if reason.client_reachable() {
            let _ = self
                .outbound
                .send(MessageRoute::Close {
                    code: NORMAL_CLOSURE,
                    reason: reason.as_str().to_string(),
                })
                .await;
        }

        info!(
            session_id = %self.id,
            previous_state = %previous,
            reason = reason.as_str(),
            "Relay session closed"
        );
        true
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn deliver(&self, route: MessageRoute) -> RelayResult<()> {
        self.outbound
            .send(route)
            .await
            .map_err(|_| RelayError::Transport("client channel closed".to_string()))
    }

    fn touch(&mut self) {
        self.idle_deadline = Instant::now() + self.config.idle_timeout;
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(session_id = %self.id, from = %self.state, to = %next, "Session state change");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::upstream::{ResponseModality, UpstreamConnection, UpstreamResult};
    use crate::core::protocol::FrameTag;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Audio(Bytes),
        Stop,
        Close,
    }

    struct RecordingConnection {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    #[async_trait]
    impl UpstreamConnection for RecordingConnection {
        async fn send_audio(&mut self, pcm: Bytes) -> UpstreamResult<()> {
            self.calls.lock().push(Call::Audio(pcm));
            Ok(())
        }

        async fn send_stop(&mut self) -> UpstreamResult<()> {
            self.calls.lock().push(Call::Stop);
            Ok(())
        }

        async fn close(&mut self) -> UpstreamResult<()> {
            self.calls.lock().push(Call::Close);
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    /// Opens never complete; tests inject connections directly.
    #[derive(Default)]
    struct PendingConnector {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamConnector for PendingConnector {
        async fn open(
            &self,
            _config: UpstreamConfig,
            _on_event: UpstreamEventCallback,
        ) -> UpstreamResult<BoxedUpstream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "pending"
        }
    }

    fn session_config(reconnection: ReconnectionConfig) -> SessionConfig {
        SessionConfig {
            idle_timeout: Duration::from_secs(60),
            reconnection,
            close_on_upstream_exhausted: false,
            upstream: UpstreamConfig {
                url: "ws://127.0.0.1:1".to_string(),
                api_key: Some("test".to_string()),
                model: "test-model".to_string(),
                voice: None,
                response_modality: ResponseModality::Audio,
                system_instruction: String::new(),
                input_sample_rate: 16000,
            },
        }
    }

    struct Harness {
        session: RelaySession,
        outbound: mpsc::Receiver<MessageRoute>,
        calls: Arc<Mutex<Vec<Call>>>,
        connector: Arc<PendingConnector>,
    }

    fn harness(reconnection: ReconnectionConfig) -> Harness {
        let (tx, rx) = mpsc::channel(64);
        let connector = Arc::new(PendingConnector::default());
        let session = RelaySession::new(
            Uuid::new_v4(),
            session_config(reconnection),
            connector.clone(),
            tx,
        );
        Harness {
            session,
            outbound: rx,
            calls: Arc::new(Mutex::new(Vec::new())),
            connector,
        }
    }

    impl Harness {
        /// Put the session in READY with a recording connection.
        async fn ready(&mut self) {
            let connection = Box::new(RecordingConnection {
                calls: self.calls.clone(),
            });
            let generation = self.session.generation;
            self.session
                .on_upstream_opened(generation, connection)
                .await
                .unwrap();
            assert_eq!(
                self.outbound.try_recv().unwrap(),
                MessageRoute::Control(ControlMessage::status(STATUS_CONNECTED))
            );
        }

        fn drain(&mut self) -> Vec<MessageRoute> {
            let mut routes = Vec::new();
            while let Ok(route) = self.outbound.try_recv() {
                routes.push(route);
            }
            routes
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    fn audio_frame(payload: &[u8]) -> Bytes {
        Frame::Audio(Bytes::copy_from_slice(payload)).encode()
    }

    #[tokio::test]
    async fn test_first_audio_opens_upstream_and_is_dropped() {
        let mut h = harness(ReconnectionConfig::default());
        assert_eq!(h.session.state(), SessionState::Idle);

        h.session
            .handle_client_binary(audio_frame(&[1, 2]))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(h.connector.opens.load(Ordering::SeqCst), 1);

        // Still connecting: dropped without another open
        h.session
            .handle_client_binary(audio_frame(&[3, 4]))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(h.connector.opens.load(Ordering::SeqCst), 1);
        assert!(h.drain().is_empty());

        h.session.cleanup(CloseReason::ClientDisconnected).await;
    }

    #[tokio::test]
    async fn test_audio_then_turn_complete() {
        let mut h = harness(ReconnectionConfig::default());
        h.ready().await;
        assert_eq!(h.session.state(), SessionState::Ready);

        h.session
            .handle_upstream_event(UpstreamEvent::Audio(Bytes::from_static(&[7, 8])))
            .await
            .unwrap();
        assert_eq!(h.session.state(), SessionState::Speaking);

        h.session
            .handle_upstream_event(UpstreamEvent::TurnComplete)
            .await
            .unwrap();
        assert_eq!(h.session.state(), SessionState::Ready);

        assert_eq!(
            h.drain(),
            vec![
                MessageRoute::Binary(Bytes::from_static(&[0x01, 7, 8])),
                MessageRoute::Binary(Bytes::from_static(&[0x02])),
            ]
        );
    }

    #[tokio::test]
    async fn test_barge_in_interrupts_before_forwarding() {
        let mut h = harness(ReconnectionConfig::default());
        h.ready().await;
        h.session
            .handle_upstream_event(UpstreamEvent::Audio(Bytes::from_static(&[1, 1])))
            .await
            .unwrap();
        h.drain();

        h.session
            .handle_client_binary(audio_frame(&[9, 9]))
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Ready);
        assert_eq!(
            h.drain(),
            vec![MessageRoute::Binary(Bytes::from_static(&[0x03]))]
        );
        assert_eq!(
            h.calls(),
            vec![Call::Stop, Call::Audio(Bytes::from_static(&[9, 9]))]
        );
    }

    #[tokio::test]
    async fn test_audio_while_ready_is_forwarded_without_interruption() {
        let mut h = harness(ReconnectionConfig::default());
        h.ready().await;

        h.session
            .handle_client_binary(audio_frame(&[5, 6]))
            .await
            .unwrap();

        assert!(h.drain().is_empty());
        assert_eq!(h.calls(), vec![Call::Audio(Bytes::from_static(&[5, 6]))]);
    }

    #[tokio::test]
    async fn test_explicit_interruption_control_message() {
        let mut h = harness(ReconnectionConfig::default());
        h.ready().await;
        h.session
            .handle_upstream_event(UpstreamEvent::Audio(Bytes::from_static(&[1, 1])))
            .await
            .unwrap();
        h.drain();

        h.session
            .handle_client_text(r#"{"type":"interruption"}"#)
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Ready);
        assert_eq!(
            h.drain(),
            vec![MessageRoute::Binary(Bytes::from_static(&[0x03]))]
        );
        assert_eq!(h.calls(), vec![Call::Stop]);
    }

    #[tokio::test]
    async fn test_upstream_interrupted_returns_to_ready() {
        let mut h = harness(ReconnectionConfig::default());
        h.ready().await;
        h.session
            .handle_upstream_event(UpstreamEvent::Audio(Bytes::from_static(&[1, 1])))
            .await
            .unwrap();
        h.drain();

        h.session
            .handle_upstream_event(UpstreamEvent::Interrupted)
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Ready);
        assert_eq!(
            h.drain(),
            vec![MessageRoute::Binary(Bytes::from_static(&[0x03]))]
        );
        // The service already stopped on its own
        assert!(h.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_upstream_audio_is_dropped() {
        let mut h = harness(ReconnectionConfig::default());
        h.ready().await;

        h.session
            .handle_upstream_event(UpstreamEvent::Audio(Bytes::new()))
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Ready);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_protocol_errors() {
        let mut h = harness(ReconnectionConfig::default());
        h.ready().await;

        let err = h.session.handle_client_binary(Bytes::new()).await.unwrap_err();
        assert!(matches!(err, RelayError::Protocol(ProtocolError::EmptyFrame)));

        let err = h
            .session
            .handle_client_binary(Bytes::from_static(&[0x02]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::UnexpectedFrame(FrameTag::TurnComplete))
        ));

        let err = h
            .session
            .handle_client_binary(Bytes::from_static(&[0x03]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::UnexpectedFrame(FrameTag::Interruption))
        ));

        let err = h.session.handle_client_text("{nope").await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::MalformedControl(_))
        ));

        assert_eq!(h.session.state(), SessionState::Ready);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_stale_generation_events_are_ignored() {
        let mut h = harness(ReconnectionConfig::default());
        h.ready().await;
        let stale = h.session.generation.wrapping_sub(1);

        h.session
            .handle_session_event(SessionEvent::Upstream {
                generation: stale,
                event: UpstreamEvent::Audio(Bytes::from_static(&[1, 2])),
            })
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Ready);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_give_up_emits_single_error() {
        let mut h = harness(ReconnectionConfig::disabled());
        h.ready().await;

        h.session
            .handle_upstream_event(UpstreamEvent::Error("boom".to_string()))
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Idle);
        let routes = h.drain();
        assert_eq!(routes.len(), 1);
        assert!(matches!(
            &routes[0],
            MessageRoute::Control(ControlMessage::Error { .. })
        ));
        assert_eq!(h.calls(), vec![Call::Close]);

    }

    #[tokio::test]
    async fn test_audio_after_give_up_tries_once_more() {
        let mut h = harness(ReconnectionConfig::disabled());
        h.ready().await;
        h.session
            .handle_upstream_event(UpstreamEvent::Error("boom".to_string()))
            .await
            .unwrap();
        h.drain();

        // The client speaking again is a fresh request, not a silent retry
        h.session
            .handle_client_binary(audio_frame(&[1, 2]))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(h.connector.opens.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.state(), SessionState::Connecting);

        let generation = h.session.generation;
        h.session
            .handle_session_event(SessionEvent::OpenFailed {
                generation,
                error: UpstreamError::ConnectionFailed("refused".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Idle);
        let routes = h.drain();
        assert_eq!(routes.len(), 1);
        assert!(matches!(
            &routes[0],
            MessageRoute::Control(ControlMessage::Error { message }) if message.contains("refused")
        ));
        tokio::task::yield_now().await;
        assert_eq!(h.connector.opens.load(Ordering::SeqCst), 1);

        // A successful open re-arms automatic reconnection
        h.session
            .handle_client_binary(audio_frame(&[3, 4]))
            .await
            .unwrap();
        let connection = Box::new(RecordingConnection {
            calls: h.calls.clone(),
        });
        let generation = h.session.generation;
        h.session
            .on_upstream_opened(generation, connection)
            .await
            .unwrap();
        assert_eq!(
            h.drain(),
            vec![MessageRoute::Control(ControlMessage::status(STATUS_RECONNECTED))]
        );
        assert!(!h.session.reconnect.is_exhausted());
        assert!(!h.session.user_retry);
    }

    #[tokio::test]
    async fn test_close_during_open_is_a_failure() {
        let mut h = harness(ReconnectionConfig::fixed(3, Duration::from_millis(10)));
        h.session
            .handle_client_binary(audio_frame(&[1, 2]))
            .await
            .unwrap();
        let generation = h.session.generation;

        h.session
            .handle_session_event(SessionEvent::Upstream {
                generation,
                event: UpstreamEvent::Closed(Some("quota exceeded".to_string())),
            })
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(h.session.reconnect.attempts(), 1);

        // The open that raced the close reports back late and is discarded
        let connection = Box::new(RecordingConnection {
            calls: h.calls.clone(),
        });
        h.session
            .handle_session_event(SessionEvent::Opened {
                generation,
                connection,
            })
            .await
            .unwrap();
        assert_eq!(h.calls(), vec![Call::Close]);
        assert_eq!(h.session.state(), SessionState::Connecting);
        assert!(h.drain().is_empty());

        h.session.cleanup(CloseReason::ClientDisconnected).await;
    }

    #[tokio::test]
    async fn test_events_before_open_returns_are_replayed() {
        let mut h = harness(ReconnectionConfig::default());
        h.session
            .handle_client_binary(audio_frame(&[1, 2]))
            .await
            .unwrap();
        let generation = h.session.generation;

        h.session
            .handle_session_event(SessionEvent::Upstream {
                generation,
                event: UpstreamEvent::Audio(Bytes::from_static(&[4, 2])),
            })
            .await
            .unwrap();
        assert!(h.drain().is_empty());

        let connection = Box::new(RecordingConnection {
            calls: h.calls.clone(),
        });
        h.session
            .on_upstream_opened(generation, connection)
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Speaking);
        assert_eq!(
            h.drain(),
            vec![
                MessageRoute::Control(ControlMessage::status(STATUS_CONNECTED)),
                MessageRoute::Binary(Bytes::from_static(&[0x01, 4, 2])),
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_callback_waits_when_buffer_is_full() {
        let mut h = harness(ReconnectionConfig::default());
        let on_event = h.session.upstream_callback(h.session.generation);

        for _ in 0..EVENT_BUFFER_SIZE {
            on_event(UpstreamEvent::TurnComplete).await;
        }
        let overflow = tokio::time::timeout(
            Duration::from_millis(20),
            on_event(UpstreamEvent::TurnComplete),
        )
        .await;
        assert!(overflow.is_err(), "full event buffer should apply backpressure");

        h.session.events_rx.recv().await.unwrap();
        tokio::time::timeout(
            Duration::from_millis(20),
            on_event(UpstreamEvent::TurnComplete),
        )
        .await
        .expect("a freed slot should accept the event");
    }

    #[tokio::test]
    async fn test_give_up_can_close_session() {
        let mut h = harness(ReconnectionConfig::disabled());
        h.session.config.close_on_upstream_exhausted = true;
        h.ready().await;

        h.session
            .handle_upstream_event(UpstreamEvent::Closed(None))
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Closed);
        let routes = h.drain();
        assert_eq!(routes.len(), 2);
        assert!(matches!(
            &routes[0],
            MessageRoute::Control(ControlMessage::Error { .. })
        ));
        assert_eq!(
            routes[1],
            MessageRoute::Close {
                code: NORMAL_CLOSURE,
                reason: CloseReason::UpstreamExhausted.as_str().to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_schedules_reconnect() {
        let mut h = harness(ReconnectionConfig::fixed(3, Duration::from_millis(10)));
        h.ready().await;

        h.session
            .handle_upstream_event(UpstreamEvent::Closed(Some("going away".to_string())))
            .await
            .unwrap();

        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(h.session.reconnect.attempts(), 1);
        assert!(h.drain().is_empty());

        h.session.cleanup(CloseReason::ClientDisconnected).await;
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let mut h = harness(ReconnectionConfig::default());
        h.ready().await;

        assert!(h.session.cleanup(CloseReason::IdleTimeout).await);
        assert!(!h.session.cleanup(CloseReason::ClientDisconnected).await);

        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(h.calls(), vec![Call::Close]);
        assert_eq!(
            h.drain(),
            vec![MessageRoute::Close {
                code: NORMAL_CLOSURE,
                reason: CloseReason::IdleTimeout.as_str().to_string()
            }]
        );
        assert_eq!(h.session.close_reason, Some(CloseReason::IdleTimeout));
    }

    #[tokio::test]
    async fn test_late_open_after_cleanup_is_closed() {
        let mut h = harness(ReconnectionConfig::default());
        h.session.cleanup(CloseReason::ClientDisconnected).await;

        let connection = Box::new(RecordingConnection {
            calls: h.calls.clone(),
        });
        let generation = h.session.generation;
        h.session
            .on_upstream_opened(generation, connection)
            .await
            .unwrap();

        assert_eq!(h.calls(), vec![Call::Close]);
        assert!(h.drain().is_empty());
    }
}
