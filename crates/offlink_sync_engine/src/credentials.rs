//! Credential storage.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Key-value persistence for tokens.
///
/// Implement this on top of the platform's secure storage. The core only
/// reads and writes the access and refresh token keys from
/// [`EngineConfig`](crate::EngineConfig).
pub trait CredentialStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores a value.
    fn set(&self, key: &str, value: &str);

    /// Removes a value.
    fn delete(&self, key: &str);

    /// Removes every value.
    fn clear_all(&self);
}

/// In-memory credential store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    fn delete(&self, key: &str) {
        self.values.write().remove(key);
    }

    fn clear_all(&self) {
        self.values.write().clear();
    }
}
