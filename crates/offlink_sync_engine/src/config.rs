//! Configuration for the sync engine.

use std::path::PathBuf;

/// Credential key for the access token.
pub const DEFAULT_ACCESS_TOKEN_KEY: &str = "auth.token";
/// Credential key for the refresh token.
pub const DEFAULT_REFRESH_TOKEN_KEY: &str = "auth.refreshToken";

/// What a replay pass does when a queued mutation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPolicy {
    /// Abort the pass at the first failure. Later entries are not attempted
    /// until the next reconnect, so delivery order is never violated.
    #[default]
    StopOnFailure,
    /// Leave a failed entry queued and keep replaying the ones behind it.
    /// Entries may then reach the backend out of submission order.
    SkipFailed,
}

/// Configuration for the offline transport core.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Credential store key holding the access token.
    pub access_token_key: String,
    /// Credential store key holding the refresh token.
    pub refresh_token_key: String,
    /// Replay failure policy.
    pub replay_policy: ReplayPolicy,
    /// JSONL file backing the offline queue. `None` keeps it in memory.
    pub queue_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Creates a configuration with default keys and an in-memory queue.
    pub fn new() -> Self {
        Self {
            access_token_key: DEFAULT_ACCESS_TOKEN_KEY.to_string(),
            refresh_token_key: DEFAULT_REFRESH_TOKEN_KEY.to_string(),
            replay_policy: ReplayPolicy::default(),
            queue_path: None,
        }
    }

    /// Sets the access token key.
    pub fn with_access_token_key(mut self, key: impl Into<String>) -> Self {
        self.access_token_key = key.into();
        self
    }

    /// Sets the refresh token key.
    pub fn with_refresh_token_key(mut self, key: impl Into<String>) -> Self {
        self.refresh_token_key = key.into();
        self
    }

    /// Sets the replay policy.
    pub fn with_replay_policy(mut self, policy: ReplayPolicy) -> Self {
        self.replay_policy = policy;
        self
    }

    /// Persists the offline queue to a JSONL file.
    pub fn with_queue_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.queue_path = Some(path.into());
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
