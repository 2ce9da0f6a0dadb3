//! Gemini Live upstream.
//!
//! Bidirectional audio conversation over the Gemini Live WebSocket API.
//!
//! # Audio Format
//!
//! Input is PCM 16-bit LE mono at the capture rate (16kHz by default),
//! announced through the `mimeType` of each chunk. Output is PCM 16-bit LE
//! mono at 24kHz.

mod client;
mod config;
mod messages;

pub use client::{GeminiLiveConnection, GeminiLiveConnector};
pub use config::{DEFAULT_MODEL, GEMINI_LIVE_URL, GeminiVoice, SETUP_TIMEOUT_MS};
pub use messages::{ClientMessage, ServerMessage};
