//! Base traits and types for upstream speech services.
//!
//! # Audio Format
//!
//! Audio sent upstream is PCM 16-bit signed little-endian mono at the capture
//! rate. Audio received from upstream is PCM16 LE mono at the playback rate.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors reported by an upstream connection.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection to the service could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration (missing key, bad URL)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The service did not acknowledge setup in time
    #[error("Setup timed out after {0}ms")]
    SetupTimeout(u64),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The service closed the connection
    #[error("Connection closed by service: {0}")]
    Closed(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Output modality requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseModality {
    #[default]
    Audio,
    Text,
}

impl ResponseModality {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "AUDIO",
            Self::Text => "TEXT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUDIO" => Some(Self::Audio),
            "TEXT" => Some(Self::Text),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for opening an upstream connection.
#[derive(Clone)]
pub struct UpstreamConfig {
    /// WebSocket endpoint
    pub url: String,
    /// API key, appended to the endpoint as `key=...`
    pub api_key: Option<String>,
    pub model: String,
    pub voice: Option<String>,
    pub response_modality: ResponseModality,
    pub system_instruction: String,
    /// Sample rate of the PCM sent upstream
    pub input_sample_rate: u32,
}

impl UpstreamConfig {
    /// MIME type attached to every outgoing audio chunk.
    pub fn input_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.input_sample_rate)
    }
}

// The API key never shows up in logs.
impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("response_modality", &self.response_modality)
            .field("input_sample_rate", &self.input_sample_rate)
            .finish()
    }
}

impl Drop for UpstreamConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

// =============================================================================
// Events and Callbacks
// =============================================================================

/// Everything an open connection can report after `open` has resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Decoded PCM16 LE audio. May be empty.
    Audio(Bytes),
    /// The model finished its turn.
    TurnComplete,
    /// The service detected user speech and abandoned its reply.
    Interrupted,
    /// The connection failed.
    Error(String),
    /// The service closed the connection without being asked to.
    Closed(Option<String>),
}

impl UpstreamEvent {
    /// Error and close events end the connection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpstreamEvent::Error(_) | UpstreamEvent::Closed(_))
    }
}

/// Callback invoked for every [`UpstreamEvent`].
pub type UpstreamEventCallback =
    Arc<dyn Fn(UpstreamEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Traits
// =============================================================================

/// Opens upstream connections.
///
/// `open` resolving successfully is the `onopen` signal: the returned
/// connection is ready to accept audio.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn open(
        &self,
        config: UpstreamConfig,
        on_event: UpstreamEventCallback,
    ) -> UpstreamResult<BoxedUpstream>;

    /// Short identifier used in logs.
    fn name(&self) -> &'static str;
}

/// One open upstream stream.
#[async_trait]
pub trait UpstreamConnection: Send + Sync {
    /// Send a chunk of PCM16 LE audio at the configured input rate.
    async fn send_audio(&mut self, pcm: Bytes) -> UpstreamResult<()>;

    /// Tell the service the user stopped (or interrupted) so it ends its reply.
    async fn send_stop(&mut self) -> UpstreamResult<()>;

    /// Close the connection. No further events are delivered afterwards.
    async fn close(&mut self) -> UpstreamResult<()>;

    fn is_open(&self) -> bool;
}

/// Type alias for boxed upstream connections.
pub type BoxedUpstream = Box<dyn UpstreamConnection>;

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UpstreamConfig {
        UpstreamConfig {
            url: "wss://example.com/live".to_string(),
            api_key: Some("secret-key".to_string()),
            model: "model".to_string(),
            voice: None,
            response_modality: ResponseModality::Audio,
            system_instruction: "Be brief.".to_string(),
            input_sample_rate: 16000,
        }
    }

    #[test]
    fn test_response_modality_parse() {
        assert_eq!(ResponseModality::parse("audio"), Some(ResponseModality::Audio));
        assert_eq!(ResponseModality::parse(" TEXT "), Some(ResponseModality::Text));
        assert_eq!(ResponseModality::parse("video"), None);
        assert_eq!(ResponseModality::default().to_string(), "AUDIO");
    }

    #[test]
    fn test_input_mime_type() {
        assert_eq!(config().input_mime_type(), "audio/pcm;rate=16000");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let debug = format!("{:?}", config());
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_terminal_events() {
        assert!(UpstreamEvent::Error("x".into()).is_terminal());
        assert!(UpstreamEvent::Closed(None).is_terminal());
        assert!(!UpstreamEvent::TurnComplete.is_terminal());
        assert!(!UpstreamEvent::Audio(Bytes::new()).is_terminal());
    }

    #[test]
    fn test_error_display() {
        let err = UpstreamError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));
        assert_eq!(UpstreamError::NotConnected.to_string(), "Not connected");
    }
}
