use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::session::SessionRegistry;
use crate::core::upstream::{GeminiLiveConnector, UpstreamConnector};

/// Application state shared by every request.
pub struct AppState {
    pub config: ServerConfig,
    pub sessions: SessionRegistry,
    pub connector: Arc<dyn UpstreamConnector>,
}

impl AppState {
    /// State backed by the Gemini Live connector.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_connector(config, Arc::new(GeminiLiveConnector::new()))
    }

    /// State backed by any upstream connector.
    pub fn with_connector(config: ServerConfig, connector: Arc<dyn UpstreamConnector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: SessionRegistry::new(),
            connector,
        })
    }
}
