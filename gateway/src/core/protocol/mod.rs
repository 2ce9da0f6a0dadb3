//! Client ⇄ relay wire protocol.
//!
//! One WebSocket carries two kinds of frames:
//!
//! - **Binary frames**: byte 0 is a [`FrameTag`]. `AUDIO (0x01)` is followed by
//!   raw PCM16 LE mono; `TURN_COMPLETE (0x02)` and `INTERRUPTION (0x03)` carry no
//!   payload.
//! - **Text frames**: JSON [`ControlMessage`]s discriminated by `type`
//!   (`status`, `error`, `session_timeout`, `interruption`).
//!
//! Audio frames are tagged in both directions.

mod control;
mod frame;

pub use control::ControlMessage;
pub use frame::{Frame, FrameTag};

use thiserror::Error;

/// WebSocket close code for a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Malformed frame or control message. Always recoverable: the offending
/// frame is logged and dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty binary frame")]
    EmptyFrame,

    #[error("Unknown frame tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("Frame tag {tag:?} carries no payload but {len} bytes followed")]
    UnexpectedPayload { tag: FrameTag, len: usize },

    #[error("Frame {0:?} is not accepted in this direction")]
    UnexpectedFrame(FrameTag),

    #[error("Malformed control message: {0}")]
    MalformedControl(String),

    #[error("PCM16 payload has odd length {0}")]
    OddPcmLength(usize),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
