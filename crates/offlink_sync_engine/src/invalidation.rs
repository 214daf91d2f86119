//! Tag-based cache invalidation.
//!
//! Features contribute [`TagMap`]s that translate logical tags into the
//! cache keys they cover. The core never knows which features exist: the
//! maps are plain data passed into [`invalidate_by_tags`].

use async_trait::async_trait;
use offlink_protocol::{CacheKey, Tag};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// The query cache the invalidation engine drives.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Marks every entry under `key` as stale.
    async fn invalidate(&self, key: &CacheKey);

    /// Abandons all in-flight reads.
    async fn cancel_all(&self);

    /// Drops every cached entry.
    async fn clear(&self);
}

/// A cache key getter failed to produce a key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cache key getter failed: {0}")]
pub struct KeyError(pub String);

/// Produces one cache key for a tag.
pub type KeyGetter = Arc<dyn Fn() -> Result<CacheKey, KeyError> + Send + Sync>;

/// Tag → key getters table contributed by one feature.
#[derive(Clone, Default)]
pub struct TagMap {
    entries: HashMap<Tag, Vec<KeyGetter>>,
}

impl TagMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an infallible key getter under `tag`.
    pub fn with_key<F>(self, tag: impl Into<Tag>, getter: F) -> Self
    where
        F: Fn() -> CacheKey + Send + Sync + 'static,
    {
        self.with_getter(tag, move || Ok(getter()))
    }

    /// Registers a fallible key getter under `tag`.
    pub fn with_getter<F>(mut self, tag: impl Into<Tag>, getter: F) -> Self
    where
        F: Fn() -> Result<CacheKey, KeyError> + Send + Sync + 'static,
    {
        self.entries
            .entry(tag.into())
            .or_default()
            .push(Arc::new(getter));
        self
    }

    /// Returns the getters registered under `tag`.
    pub fn getters(&self, tag: &Tag) -> &[KeyGetter] {
        self.entries.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns true if `tag` has at least one getter.
    pub fn contains(&self, tag: &Tag) -> bool {
        !self.getters(tag).is_empty()
    }

    /// Returns all tags in this map.
    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.entries.keys()
    }
}

impl fmt::Debug for TagMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.entries.keys().map(Tag::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("TagMap").field("tags", &tags).finish()
    }
}

/// Resolves `tags` against `maps` into a de-duplicated key list.
///
/// Keys are returned in first-seen order. Getters that fail or return an
/// empty key are skipped.
pub fn resolve_keys(tags: &[Tag], maps: &[TagMap]) -> Vec<CacheKey> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();

    for tag in tags {
        for map in maps {
            for getter in map.getters(tag) {
                match getter() {
                    Ok(key) if key.is_empty() => {
                        warn!(tag = %tag, "skipping empty cache key");
                    }
                    Ok(key) => {
                        if seen.insert(key.signature()) {
                            keys.push(key);
                        }
                    }
                    Err(e) => {
                        warn!(tag = %tag, error = %e, "skipping cache key getter");
                    }
                }
            }
        }
    }

    keys
}

/// Invalidates every cache key covered by `tags`, each exactly once.
///
/// Returns the number of keys invalidated.
pub async fn invalidate_by_tags(cache: &dyn CacheClient, tags: &[Tag], maps: &[TagMap]) -> usize {
    if tags.is_empty() || maps.is_empty() {
        return 0;
    }

    let keys = resolve_keys(tags, maps);
    for key in &keys {
        cache.invalidate(key).await;
    }
    debug!(tags = tags.len(), keys = keys.len(), "invalidated cache by tags");
    keys.len()
}
