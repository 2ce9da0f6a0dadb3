use std::path::PathBuf;

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{
    DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_PORT, DEFAULT_RECONNECT_DELAY_MS,
    DEFAULT_RECONNECT_MAX_ATTEMPTS, DEFAULT_SYSTEM_INSTRUCTION, ServerConfig, TlsConfig,
};
use crate::core::pcm::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::core::upstream::gemini::{DEFAULT_MODEL, GEMINI_LIVE_URL};

/// Build a [`ServerConfig`] from environment variables with optional YAML overrides.
///
/// YAML values win over environment values, which win over defaults.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, String> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let tls_yaml = server.tls.unwrap_or_default();
    let upstream = yaml.upstream.unwrap_or_default();
    let session = yaml.session.unwrap_or_default();
    let audio = yaml.audio.unwrap_or_default();

    let tls_enabled = tls_yaml.enabled.or(env.tls_enabled).unwrap_or(false);
    let tls = if tls_enabled {
        let cert_path = tls_yaml.cert_path.or(env.tls_cert_path);
        let key_path = tls_yaml.key_path.or(env.tls_key_path);
        match (cert_path, key_path) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            _ => {
                return Err(
                    "TLS is enabled but TLS_CERT_PATH and TLS_KEY_PATH are not both set"
                        .to_string(),
                );
            }
        }
    } else {
        None
    };

    Ok(ServerConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: server.port.or(env.port).unwrap_or(DEFAULT_PORT),
        tls,

        gemini_api_key: upstream.api_key.or(env.gemini_api_key),
        upstream_url: upstream
            .url
            .or(env.upstream_url)
            .unwrap_or_else(|| GEMINI_LIVE_URL.to_string()),
        upstream_model: upstream
            .model
            .or(env.upstream_model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        upstream_voice: upstream.voice.or(env.upstream_voice),
        upstream_response_modality: upstream
            .response_modality
            .or(env.upstream_response_modality)
            .unwrap_or_else(|| "AUDIO".to_string()),
        upstream_system_instruction: upstream
            .system_instruction
            .or(env.upstream_system_instruction)
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),

        session_idle_timeout_seconds: session
            .idle_timeout_seconds
            .or(env.session_idle_timeout_seconds)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
        upstream_reconnect_max_attempts: session
            .reconnect_max_attempts
            .or(env.upstream_reconnect_max_attempts)
            .unwrap_or(DEFAULT_RECONNECT_MAX_ATTEMPTS),
        upstream_reconnect_delay_ms: session
            .reconnect_delay_ms
            .or(env.upstream_reconnect_delay_ms)
            .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
        close_on_upstream_exhausted: session
            .close_on_upstream_exhausted
            .or(env.close_on_upstream_exhausted)
            .unwrap_or(false),

        capture_sample_rate: audio
            .capture_sample_rate
            .or(env.capture_sample_rate)
            .unwrap_or(CAPTURE_SAMPLE_RATE),
        playback_sample_rate: audio
            .playback_sample_rate
            .or(env.playback_sample_rate)
            .unwrap_or(PLAYBACK_SAMPLE_RATE),
    })
}
