use serde::{Deserialize, Serialize};

use super::{ProtocolError, ProtocolResult};

/// JSON control message exchanged as a WebSocket text frame.
///
/// ```json
/// {"type": "status", "message": "Connected to speech service"}
/// {"type": "interruption"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "status")]
    Status {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        message: String,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        message: String,
    },

    #[serde(rename = "session_timeout")]
    SessionTimeout {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        message: String,
    },

    /// Client → relay: stop the current reply. Relay → client: playback should stop.
    #[serde(rename = "interruption")]
    Interruption {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        message: String,
    },
}

impl ControlMessage {
    pub fn status(message: impl Into<String>) -> Self {
        ControlMessage::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ControlMessage::Error {
            message: message.into(),
        }
    }

    pub fn session_timeout(message: impl Into<String>) -> Self {
        ControlMessage::SessionTimeout {
            message: message.into(),
        }
    }

    pub fn interruption() -> Self {
        ControlMessage::Interruption {
            message: String::new(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ControlMessage::Status { message }
            | ControlMessage::Error { message }
            | ControlMessage::SessionTimeout { message }
            | ControlMessage::Interruption { message } => message,
        }
    }

    pub fn parse(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedControl(e.to_string()))
    }

    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::MalformedControl(e.to_string()))
    }
}
