//! Configuration module for the voice relay
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use voice_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Relay listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::session::SessionConfig;
use crate::core::upstream::{ReconnectionConfig, ResponseModality, UpstreamConfig};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a friendly voice assistant. Keep replies short and conversational.";

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains all configuration needed to run the relay:
/// - Server settings (host, port, TLS)
/// - Upstream speech service settings (endpoint, credentials, model, persona)
/// - Session behavior (idle window, reconnection policy)
/// - PCM sample rates for each direction
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Upstream speech service
    pub gemini_api_key: Option<String>,
    pub upstream_url: String,
    pub upstream_model: String,
    pub upstream_voice: Option<String>,
    /// `AUDIO` or `TEXT`
    pub upstream_response_modality: String,
    pub upstream_system_instruction: String,

    // Session behavior
    pub session_idle_timeout_seconds: u64,
    pub upstream_reconnect_max_attempts: u32,
    pub upstream_reconnect_delay_ms: u64,
    /// Close the client channel after reconnection gives up instead of keeping it open
    pub close_on_upstream_exhausted: bool,

    // Audio
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            gemini_api_key: None,
            upstream_url: crate::core::upstream::gemini::GEMINI_LIVE_URL.to_string(),
            upstream_model: crate::core::upstream::gemini::DEFAULT_MODEL.to_string(),
            upstream_voice: None,
            upstream_response_modality: "AUDIO".to_string(),
            upstream_system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            session_idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECS,
            upstream_reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            upstream_reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            close_on_upstream_exhausted: false,
            capture_sample_rate: crate::core::pcm::CAPTURE_SAMPLE_RATE,
            playback_sample_rate: crate::core::pcm::PLAYBACK_SAMPLE_RATE,
        }
    }
}

/// Wipe the upstream API key from memory when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.gemini_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and a previously loaded .env file)
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs before this runs, so it is already part of the
        // environment base that YAML overrides.
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Get the server address as a string in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_seconds)
    }

    /// Bounded, fixed-delay reconnection policy for upstream connections.
    /// Zero attempts disables reconnection.
    pub fn reconnection_config(&self) -> ReconnectionConfig {
        if self.upstream_reconnect_max_attempts == 0 {
            return ReconnectionConfig::disabled();
        }
        ReconnectionConfig::fixed(
            self.upstream_reconnect_max_attempts,
            Duration::from_millis(self.upstream_reconnect_delay_ms),
        )
    }

    /// Parameters passed to the upstream connector on every open
    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            url: self.upstream_url.clone(),
            api_key: self.gemini_api_key.clone(),
            model: self.upstream_model.clone(),
            voice: self.upstream_voice.clone(),
            response_modality: ResponseModality::parse(&self.upstream_response_modality)
                .unwrap_or_default(),
            system_instruction: self.upstream_system_instruction.clone(),
            input_sample_rate: self.capture_sample_rate,
        }
    }

    /// Per-connection settings for a relay session
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: self.idle_timeout(),
            reconnection: self.reconnection_config(),
            close_on_upstream_exhausted: self.close_on_upstream_exhausted,
            upstream: self.upstream_config(),
        }
    }
}
