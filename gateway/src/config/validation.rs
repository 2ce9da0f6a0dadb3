use super::{ServerConfig, TlsConfig};
use crate::core::upstream::ResponseModality;

/// Run every validation rule against a merged configuration.
pub(super) fn validate_config(config: &ServerConfig) -> Result<(), String> {
    validate_tls(&config.tls)?;
    validate_upstream_url(&config.upstream_url)?;
    validate_response_modality(&config.upstream_response_modality)?;
    validate_idle_timeout(config.session_idle_timeout_seconds)?;
    validate_sample_rates(config.capture_sample_rate, config.playback_sample_rate)?;
    Ok(())
}

/// TLS certificate and key must exist on disk when TLS is enabled.
pub(super) fn validate_tls(tls: &Option<TlsConfig>) -> Result<(), String> {
    if let Some(tls) = tls {
        if !tls.cert_path.exists() {
            return Err(format!(
                "TLS certificate file not found: {}",
                tls.cert_path.display()
            ));
        }
        if !tls.key_path.exists() {
            return Err(format!(
                "TLS private key file not found: {}",
                tls.key_path.display()
            ));
        }
    }
    Ok(())
}

/// The upstream endpoint must be a WebSocket URL.
pub(super) fn validate_upstream_url(raw: &str) -> Result<(), String> {
    let url = url::Url::parse(raw).map_err(|e| format!("Invalid upstream URL '{raw}': {e}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!(
            "Upstream URL must use ws:// or wss://, got '{other}://'"
        )),
    }
}

pub(super) fn validate_response_modality(raw: &str) -> Result<(), String> {
    ResponseModality::parse(raw)
        .map(|_| ())
        .ok_or_else(|| format!("Unsupported response modality '{raw}', expected AUDIO or TEXT"))
}

pub(super) fn validate_idle_timeout(seconds: u64) -> Result<(), String> {
    if seconds == 0 {
        return Err("Session idle timeout must be greater than zero".to_string());
    }
    Ok(())
}

pub(super) fn validate_sample_rates(capture: u32, playback: u32) -> Result<(), String> {
    if capture == 0 || playback == 0 {
        return Err(format!(
            "Sample rates must be non-zero (capture: {capture}, playback: {playback})"
        ));
    }
    Ok(())
}
