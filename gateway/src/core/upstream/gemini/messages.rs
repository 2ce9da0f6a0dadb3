//! Gemini Live wire messages.
//!
//! Client messages are single-key JSON objects (`{"setup": {...}}`,
//! `{"realtimeInput": {...}}`); server messages carry one of `setupComplete`,
//! `serverContent` or `goAway`.

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::config::{GeminiVoice, model_resource_name};
use crate::core::upstream::base::{UpstreamConfig, UpstreamEvent};

// =============================================================================
// Shared content types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 payload with its MIME type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

// =============================================================================
// Client → Gemini
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupMessage),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_end: Option<bool>,
}

impl ClientMessage {
    /// First message on every connection.
    pub fn setup(config: &UpstreamConfig) -> Self {
        let speech_config = config.voice.as_deref().map(|voice| SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: GeminiVoice::from_str_or_default(voice).as_str().to_string(),
                },
            },
        });

        let system_instruction = (!config.system_instruction.trim().is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: Some(config.system_instruction.clone()),
                inline_data: None,
            }],
        });

        ClientMessage::Setup(SetupMessage {
            model: model_resource_name(&config.model),
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality.as_str().to_string()],
                speech_config,
            },
            system_instruction,
        })
    }

    pub fn audio(pcm: &[u8], mime_type: &str) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob {
                mime_type: mime_type.to_string(),
                data: BASE64_STANDARD.encode(pcm),
            }),
            audio_stream_end: None,
        })
    }

    pub fn audio_stream_end() -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: None,
            audio_stream_end: Some(true),
        })
    }
}

// =============================================================================
// Gemini → Client
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub turn_complete: bool,
    pub interrupted: bool,
    pub generation_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Translate into relay events, in wire order: audio parts, then
    /// interruption, then turn completion.
    pub fn into_events(self) -> Vec<UpstreamEvent> {
        let mut events = Vec::new();

        if let Some(go_away) = &self.go_away {
            tracing::warn!(
                time_left = ?go_away.time_left,
                "Gemini Live announced the connection will close"
            );
        }

        let Some(content) = self.server_content else {
            return events;
        };

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(blob) = part.inline_data else {
                    continue;
                };
                match BASE64_STANDARD.decode(blob.data.as_bytes()) {
                    Ok(pcm) => events.push(UpstreamEvent::Audio(Bytes::from(pcm))),
                    Err(e) => {
                        tracing::warn!("Dropping undecodable audio part: {}", e);
                    }
                }
            }
        }

        if content.interrupted {
            events.push(UpstreamEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(UpstreamEvent::TurnComplete);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::upstream::base::ResponseModality;

    fn config(voice: Option<&str>) -> UpstreamConfig {
        UpstreamConfig {
            url: "wss://example.com".to_string(),
            api_key: Some("k".to_string()),
            model: "gemini-2.0-flash-live-001".to_string(),
            voice: voice.map(str::to_string),
            response_modality: ResponseModality::Audio,
            system_instruction: "Be brief.".to_string(),
            input_sample_rate: 16000,
        }
    }

    #[test]
    fn test_setup_serialization() {
        let json = serde_json::to_value(ClientMessage::setup(&config(Some("kore")))).unwrap();

        assert_eq!(json["setup"]["model"], "models/gemini-2.0-flash-live-001");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be brief."
        );
    }

    #[test]
    fn test_setup_without_voice_omits_speech_config() {
        let json = serde_json::to_value(ClientMessage::setup(&config(None))).unwrap();
        assert!(json["setup"]["generationConfig"].get("speechConfig").is_none());
    }

    #[test]
    fn test_audio_serialization() {
        let json =
            serde_json::to_string(&ClientMessage::audio(&[1, 2, 3], "audio/pcm;rate=16000"))
                .unwrap();
        assert!(json.contains(r#""realtimeInput""#));
        assert!(json.contains(r#""mimeType":"audio/pcm;rate=16000""#));
        assert!(json.contains(r#""data":"AQID""#));
        assert!(!json.contains("audioStreamEnd"));
    }

    #[test]
    fn test_audio_stream_end_serialization() {
        let json = serde_json::to_string(&ClientMessage::audio_stream_end()).unwrap();
        assert_eq!(json, r#"{"realtimeInput":{"audioStreamEnd":true}}"#);
    }

    #[test]
    fn test_setup_complete_parsing() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn test_server_content_events() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQID"}},
                    {"text": "ignored"}
                ]},
                "turnComplete": true
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg.into_events(),
            vec![
                UpstreamEvent::Audio(Bytes::from_static(&[1, 2, 3])),
                UpstreamEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_interrupted_event() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert_eq!(msg.into_events(), vec![UpstreamEvent::Interrupted]);
    }

    #[test]
    fn test_invalid_base64_is_skipped() {
        let json = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"!!!"}}]}}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"usageMetadata":{"totalTokenCount":3}}"#).unwrap();
        assert!(!msg.is_setup_complete());
        assert!(msg.into_events().is_empty());
    }
}
