//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /relay` - WebSocket upgrade for a duplex voice session
///
/// # Protocol
///
/// Binary frames carry a one-byte tag:
/// - `0x01` + PCM16 LE mono: audio (client → relay at 16kHz, relay → client at 24kHz)
/// - `0x02`: the model finished its turn (relay → client)
/// - `0x03`: stop playback immediately (relay → client)
///
/// Text frames carry JSON control messages discriminated by `type`:
/// - `status`, `error`, `session_timeout` (relay → client)
/// - `interruption` (client → relay)
///
/// The upstream connection opens on the first audio frame. Speaking while the
/// model is replying interrupts it. After the idle timeout the relay sends a
/// `session_timeout` message and closes with code 1000.
///
/// # Example
///
/// ```json
/// // Relay, once the speech service is ready
/// {"type": "status", "message": "Connected to speech service"}
///
/// // Client, to cut the reply short without speaking
/// {"type": "interruption"}
/// ```
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/relay", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
