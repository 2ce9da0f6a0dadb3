pub mod pcm;
pub mod protocol;
pub mod session;
pub mod upstream;

// Re-export commonly used types for convenience
pub use protocol::{ControlMessage, Frame, FrameTag, NORMAL_CLOSURE, ProtocolError, ProtocolResult};

pub use session::{
    ClientInbound, CloseReason, MessageRoute, RelaySession, SessionConfig, SessionRegistry,
    SessionState,
};

pub use upstream::{
    BoxedUpstream, GeminiLiveConnector, ReconnectDecision, ReconnectionConfig,
    ReconnectionController, ResponseModality, UpstreamConfig, UpstreamConnection,
    UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamEventCallback, UpstreamResult,
};
