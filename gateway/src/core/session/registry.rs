//! Live session registry keyed by session id.
//!
//! Each session gets a child of one root [`CancellationToken`]; cancelling the
//! root on shutdown closes every session with a normal-closure code.

use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Poll interval while waiting for sessions to drain.
const DRAIN_POLL_MS: u64 = 20;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, CancellationToken>,
    root: CancellationToken,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return the token that ends it on shutdown.
    ///
    /// A session registered after shutdown began receives an already
    /// cancelled token.
    pub fn register(&self, id: Uuid) -> CancellationToken {
        let token = self.root.child_token();
        self.sessions.insert(id, token.clone());
        token
    }

    pub fn remove(&self, id: &Uuid) {
        self.sessions.remove(id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel every session, then wait up to `grace` for them to deregister.
    ///
    /// Returns `true` if the registry drained in time.
    pub async fn shutdown_all(&self, grace: Duration) -> bool {
        let open = self.len();
        info!(sessions = open, "Closing all relay sessions");
        self.root.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        while !self.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.len(),
                    "Sessions still open after shutdown grace period"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(DRAIN_POLL_MS)).await;
        }
        true
    }
}
