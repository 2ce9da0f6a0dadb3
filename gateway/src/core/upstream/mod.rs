//! Upstream conversational speech service.
//!
//! The relay consumes the service strictly through the capability set in
//! [`base`]: `open`, `send_audio`, `send_stop`, `close`, plus a single event
//! callback standing in for `onopen`/`onmessage`/`onerror`/`onclose`. Any
//! implementation exposing this shape is substitutable.

pub mod base;
pub mod gemini;
pub mod reconnect;

pub use base::{
    BoxedUpstream, ResponseModality, UpstreamConfig, UpstreamConnection, UpstreamConnector,
    UpstreamError, UpstreamEvent, UpstreamEventCallback, UpstreamResult,
};
pub use gemini::GeminiLiveConnector;
pub use reconnect::{ReconnectDecision, ReconnectionConfig, ReconnectionController};
