//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use voice_relay::core::session::{ClientInbound, MessageRoute, SessionConfig};
use voice_relay::core::upstream::{
    BoxedUpstream, ReconnectionConfig, ResponseModality, UpstreamConfig, UpstreamConnection,
    UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamEventCallback, UpstreamResult,
};

/// What the next `open` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Succeed,
    Fail,
    /// Never resolves.
    Pending,
    /// The service closes the socket while `open` is still returning.
    CloseDuringOpen,
}

/// Everything the relay asked of the upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCall {
    Open,
    Audio(Bytes),
    Stop,
    Close,
}

#[derive(Default)]
struct MockInner {
    behaviors: VecDeque<OpenBehavior>,
    calls: Vec<UpstreamCall>,
    callback: Option<UpstreamEventCallback>,
}

/// Scripted upstream connector. Once the script runs out every open succeeds.
#[derive(Clone, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<MockInner>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(behaviors: impl IntoIterator<Item = OpenBehavior>) -> Self {
        let connector = Self::default();
        connector.inner.lock().behaviors.extend(behaviors);
        connector
    }

    pub fn calls(&self) -> Vec<UpstreamCall> {
        self.inner.lock().calls.clone()
    }

    pub fn open_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == UpstreamCall::Open)
            .count()
    }

    /// Deliver an event through the callback of the latest opened connection.
    pub async fn emit(&self, event: UpstreamEvent) {
        let callback = self.inner.lock().callback.clone();
        if let Some(callback) = callback {
            callback(event).await;
        }
    }
}

#[async_trait]
impl UpstreamConnector for MockConnector {
    async fn open(
        &self,
        _config: UpstreamConfig,
        on_event: UpstreamEventCallback,
    ) -> UpstreamResult<BoxedUpstream> {
        let behavior = {
            let mut inner = self.inner.lock();
            inner.calls.push(UpstreamCall::Open);
            inner
                .behaviors
                .pop_front()
                .unwrap_or(OpenBehavior::Succeed)
        };

        match behavior {
            OpenBehavior::Succeed => {
                self.inner.lock().callback = Some(on_event);
                Ok(Box::new(MockConnection {
                    inner: self.inner.clone(),
                    open: true,
                }))
            }
            OpenBehavior::Fail => Err(UpstreamError::ConnectionFailed(
                "mock refused connection".to_string(),
            )),
            OpenBehavior::Pending => std::future::pending().await,
            OpenBehavior::CloseDuringOpen => {
                on_event(UpstreamEvent::Closed(Some("quota exceeded".to_string()))).await;
                Ok(Box::new(MockConnection {
                    inner: self.inner.clone(),
                    open: false,
                }))
            }
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockConnection {
    inner: Arc<Mutex<MockInner>>,
    open: bool,
}

#[async_trait]
impl UpstreamConnection for MockConnection {
    async fn send_audio(&mut self, pcm: Bytes) -> UpstreamResult<()> {
        if !self.open {
            return Err(UpstreamError::NotConnected);
        }
        self.inner.lock().calls.push(UpstreamCall::Audio(pcm));
        Ok(())
    }

    async fn send_stop(&mut self) -> UpstreamResult<()> {
        if !self.open {
            return Err(UpstreamError::NotConnected);
        }
        self.inner.lock().calls.push(UpstreamCall::Stop);
        Ok(())
    }

    async fn close(&mut self) -> UpstreamResult<()> {
        self.open = false;
        let mut inner = self.inner.lock();
        inner.calls.push(UpstreamCall::Close);
        inner.callback = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

pub fn upstream_config() -> UpstreamConfig {
    UpstreamConfig {
        url: "ws://127.0.0.1:1/live".to_string(),
        api_key: Some("test-key".to_string()),
        model: "test-model".to_string(),
        voice: None,
        response_modality: ResponseModality::Audio,
        system_instruction: "Be brief.".to_string(),
        input_sample_rate: 16000,
    }
}

pub fn session_config(idle_timeout: Duration, reconnection: ReconnectionConfig) -> SessionConfig {
    SessionConfig {
        idle_timeout,
        reconnection,
        close_on_upstream_exhausted: false,
        upstream: upstream_config(),
    }
}

/// A client audio frame: `0x01` + payload.
pub fn audio_frame(payload: &[u8]) -> ClientInbound {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(0x01);
    frame.extend_from_slice(payload);
    ClientInbound::Binary(Bytes::from(frame))
}

/// Receive the next route, failing the test after `timeout`.
pub async fn next_route(
    rx: &mut mpsc::Receiver<MessageRoute>,
    timeout: Duration,
) -> MessageRoute {
    tokio::time::timeout(timeout, rx.recv())
        .await
        .expect("timed out waiting for a route")
        .expect("route channel closed")
}

/// Drain every route already queued.
pub fn drain_routes(rx: &mut mpsc::Receiver<MessageRoute>) -> Vec<MessageRoute> {
    let mut routes = Vec::new();
    while let Ok(route) = rx.try_recv() {
        routes.push(route);
    }
    routes
}
