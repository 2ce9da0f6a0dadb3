//! Relay sessions.
//!
//! One [`RelaySession`] per client connection, driven by a single task. The
//! [`SessionRegistry`] tracks live sessions so shutdown can close them all.

mod manager;
mod registry;
mod state;

pub use manager::{
    ClientInbound, CloseReason, MessageRoute, RelaySession, STATUS_CONNECTED, STATUS_RECONNECTED,
    SessionConfig,
};
pub use registry::SessionRegistry;
pub use state::SessionState;
