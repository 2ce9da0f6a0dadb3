//! Top-level error taxonomy.
//!
//! Each layer reports its own error type; [`RelayError`] groups them into the
//! four categories the relay reacts to:
//!
//! - `Transport`: the client channel failed to open or send
//! - `Upstream`: the speech service failed or closed unexpectedly
//! - `Protocol`: a malformed frame or control message (never fatal)
//! - `Timeout`: the idle window elapsed

use std::time::Duration;

use thiserror::Error;

use crate::core::protocol::ProtocolError;
use crate::core::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session idle for {}s", .0.as_secs())]
    Timeout(Duration),
}

impl RelayError {
    /// Whether the session has to shut down because of this error.
    ///
    /// Upstream failures are handled by reconnection and protocol errors only
    /// cost the offending frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Transport(_) | RelayError::Timeout(_))
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
