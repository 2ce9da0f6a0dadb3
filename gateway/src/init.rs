//! `voice-relay init`: write a commented sample configuration file.
//!
//! ```text
//! $ voice-relay init -o relay.yaml
//! $ GEMINI_API_KEY=... voice-relay -c relay.yaml
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::config::{
    DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_PORT, DEFAULT_RECONNECT_DELAY_MS,
    DEFAULT_RECONNECT_MAX_ATTEMPTS, DEFAULT_SYSTEM_INSTRUCTION,
};
use crate::core::pcm::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::core::upstream::gemini::{DEFAULT_MODEL, GEMINI_LIVE_URL};

/// Default output path for `init`.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Render the sample configuration with the built-in defaults.
pub fn sample_config() -> String {
    format!(
        r#"# Voice relay configuration
# Values here override environment variables.

server:
  host: "{DEFAULT_HOST}"
  port: {DEFAULT_PORT}
  # tls:
  #   enabled: true
  #   cert_path: "/etc/voice-relay/cert.pem"
  #   key_path: "/etc/voice-relay/key.pem"

upstream:
  # Prefer the GEMINI_API_KEY environment variable over storing the key here.
  # api_key: ""
  url: "{GEMINI_LIVE_URL}"
  model: "{DEFAULT_MODEL}"
  # voice: "Puck"
  response_modality: "AUDIO"
  system_instruction: "{DEFAULT_SYSTEM_INSTRUCTION}"

session:
  # Close a session after this long without traffic in either direction
  idle_timeout_seconds: {DEFAULT_IDLE_TIMEOUT_SECS}
  reconnect_max_attempts: {DEFAULT_RECONNECT_MAX_ATTEMPTS}
  reconnect_delay_ms: {DEFAULT_RECONNECT_DELAY_MS}
  close_on_upstream_exhausted: false

audio:
  capture_sample_rate: {CAPTURE_SAMPLE_RATE}
  playback_sample_rate: {PLAYBACK_SAMPLE_RATE}
"#
    )
}

/// Write the sample configuration to `output`. Refuses to overwrite an
/// existing file unless `force` is set.
pub fn run(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            output.display()
        );
    }

    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    std::fs::write(output, sample_config())
        .with_context(|| format!("Failed to write {}", output.display()))?;

    tracing::info!(path = %output.display(), "Wrote sample configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::YamlConfig;
    use tempfile::TempDir;

    #[test]
    fn test_sample_config_parses() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("relay.yaml");

        run(&path, false).unwrap();
        let config = YamlConfig::from_file(&path).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.port, Some(DEFAULT_PORT));
        assert!(server.tls.is_none());

        let upstream = config.upstream.unwrap();
        assert!(upstream.api_key.is_none());
        assert_eq!(upstream.model.as_deref(), Some(DEFAULT_MODEL));

        let session = config.session.unwrap();
        assert_eq!(session.idle_timeout_seconds, Some(DEFAULT_IDLE_TIMEOUT_SECS));
        assert_eq!(session.close_on_upstream_exhausted, Some(false));

        let audio = config.audio.unwrap();
        assert_eq!(audio.playback_sample_rate, Some(PLAYBACK_SAMPLE_RATE));
    }

    #[test]
    fn test_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("relay.yaml");
        std::fs::write(&path, "keep me").unwrap();

        assert!(run(&path, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");

        run(&path, true).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("session:"));
    }
}
