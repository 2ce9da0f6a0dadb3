//! Browser-side counterpart of the relay, usable from native code and tests.
//!
//! - `capture` - microphone blocks → PCM16 over a non-blocking channel
//! - `playback` - gapless scheduling with instant cancellation
//! - `transport` - relay WebSocket with unbounded reconnect
//! - `voice` - wires the three together

pub mod capture;
pub mod playback;
pub mod transport;
pub mod voice;

pub use capture::{CaptureProcessor, CaptureReceiver, capture_channel};
pub use playback::{
    AudioOutput, PlaybackBuffer, PlaybackError, PlaybackScheduler, ScheduledChunk, SourceId,
};
pub use transport::{
    TransportConfig, TransportError, TransportEvent, TransportResult, TransportSession,
    TransportState,
};
pub use voice::{ClientNotice, VoiceClient, VoiceCommand};
