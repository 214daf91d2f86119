//! Per-request metadata.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// A logical cache region, e.g. `"user:me"`.
///
/// Tags say *what* a write affects without naming concrete cache keys;
/// features translate them to keys through their tag maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Creates a tag.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the tag name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Metadata attached to a transport call.
///
/// `tags` declares which cache areas a write affects. A single tag and a
/// list of tags are both accepted by the builder and always stored as a
/// list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportRequestMeta {
    /// Cache regions affected by this call.
    pub tags: Vec<Tag>,
    /// Adapter-level retry hint. The core never retries on its own.
    pub retry: Option<bool>,
    /// Adapter-level offline hint.
    pub offline: Option<bool>,
    /// Do not attempt a credential refresh if this call is rejected.
    pub skip_refresh: bool,
    /// Do not attach the stored access token.
    pub skip_auth: bool,
    /// Bearer credential attached by the auth layer. Adapters forward it
    /// to the backend in whatever form their protocol requires.
    pub authorization: Option<String>,
}

impl TransportRequestMeta {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one tag.
    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Adds several tags.
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Sets the adapter retry hint.
    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the adapter offline hint.
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = Some(offline);
        self
    }

    /// Marks the call as never triggering a credential refresh.
    pub fn skip_refresh(mut self) -> Self {
        self.skip_refresh = true;
        self
    }

    /// Marks the call as never carrying the stored access token.
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    /// Sets the bearer credential.
    pub fn with_authorization(mut self, token: impl Into<String>) -> Self {
        self.authorization = Some(token.into());
        self
    }

    /// Returns the tags as an owned list, or `None` when there are none.
    pub fn tag_list(&self) -> Option<Vec<Tag>> {
        if self.tags.is_empty() {
            None
        } else {
            Some(self.tags.clone())
        }
    }
}
