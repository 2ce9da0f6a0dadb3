//! WebSocket request handlers
//!
//! - `relay` - client ⇄ speech service audio relay

pub mod relay;

pub use relay::relay_handler;
