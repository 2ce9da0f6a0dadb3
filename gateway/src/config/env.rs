use super::utils::{env_bool, env_parse, env_string};

/// Raw configuration values read from the process environment.
///
/// Every field is optional; defaults are applied during merging so that YAML
/// values can still take precedence over unset variables.
#[derive(Debug, Default)]
pub(super) struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_enabled: Option<bool>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,

    pub gemini_api_key: Option<String>,
    pub upstream_url: Option<String>,
    pub upstream_model: Option<String>,
    pub upstream_voice: Option<String>,
    pub upstream_response_modality: Option<String>,
    pub upstream_system_instruction: Option<String>,

    pub session_idle_timeout_seconds: Option<u64>,
    pub upstream_reconnect_max_attempts: Option<u32>,
    pub upstream_reconnect_delay_ms: Option<u64>,
    pub close_on_upstream_exhausted: Option<bool>,

    pub capture_sample_rate: Option<u32>,
    pub playback_sample_rate: Option<u32>,
}

impl EnvConfig {
    pub(super) fn load() -> Result<Self, String> {
        Ok(Self {
            host: env_string("HOST"),
            port: env_parse("PORT")?,
            tls_enabled: env_bool("TLS_ENABLED")?,
            tls_cert_path: env_string("TLS_CERT_PATH"),
            tls_key_path: env_string("TLS_KEY_PATH"),

            gemini_api_key: env_string("GEMINI_API_KEY"),
            upstream_url: env_string("UPSTREAM_URL"),
            upstream_model: env_string("UPSTREAM_MODEL"),
            upstream_voice: env_string("UPSTREAM_VOICE"),
            upstream_response_modality: env_string("UPSTREAM_RESPONSE_MODALITY"),
            upstream_system_instruction: env_string("UPSTREAM_SYSTEM_INSTRUCTION"),

            session_idle_timeout_seconds: env_parse("SESSION_IDLE_TIMEOUT_SECS")?,
            upstream_reconnect_max_attempts: env_parse("UPSTREAM_RECONNECT_MAX_ATTEMPTS")?,
            upstream_reconnect_delay_ms: env_parse("UPSTREAM_RECONNECT_DELAY_MS")?,
            close_on_upstream_exhausted: env_bool("CLOSE_ON_UPSTREAM_EXHAUSTED")?,

            capture_sample_rate: env_parse("CAPTURE_SAMPLE_RATE")?,
            playback_sample_rate: env_parse("PLAYBACK_SAMPLE_RATE")?,
        })
    }
}
