//! Cache keys.
//!
//! Keys are ordered lists of serializable parts in the form
//! `[feature, entity, id?, params?]`, with infinite pagination as
//! `[feature, entity, "infinite", params]`. Features build keys only
//! through these helpers so two equal keys always serialize identically.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A structured cache key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<Value>);

impl CacheKey {
    /// Builds a key from parts, dropping null parts.
    pub fn new<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Value>,
    {
        Self(
            parts
                .into_iter()
                .map(Into::into)
                .filter(|p| !p.is_null())
                .collect(),
        )
    }

    /// Returns the key parts.
    pub fn parts(&self) -> &[Value] {
        &self.0
    }

    /// Returns the number of parts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key has no parts.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a part. Null parts are ignored.
    pub fn push(&mut self, part: impl Into<Value>) {
        let part = part.into();
        if !part.is_null() {
            self.0.push(part);
        }
    }

    /// Returns true if `prefix` matches the leading parts of this key.
    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Serialized form, used as the structural identity of a key.
    ///
    /// Object parts are emitted with sorted field names, so keys built from
    /// the same params in a different insertion order share a signature.
    pub fn signature(&self) -> String {
        Value::Array(self.0.clone()).to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

fn params_part(params: Option<Map<String, Value>>) -> Value {
    params.map(Value::Object).unwrap_or(Value::Null)
}

/// `[feature, entity, "list", params?]`
pub fn list_key(feature: &str, entity: &str, params: Option<Map<String, Value>>) -> CacheKey {
    CacheKey::new([
        Value::from(feature),
        Value::from(entity),
        Value::from("list"),
        params_part(params),
    ])
}

/// `[feature, entity, "infinite", params?]`
pub fn infinite_key(feature: &str, entity: &str, params: Option<Map<String, Value>>) -> CacheKey {
    CacheKey::new([
        Value::from(feature),
        Value::from(entity),
        Value::from("infinite"),
        params_part(params),
    ])
}

/// `[feature, entity, "byId", id]`
pub fn by_id_key(feature: &str, entity: &str, id: impl Into<Value>) -> CacheKey {
    CacheKey::new([
        Value::from(feature),
        Value::from(entity),
        Value::from("byId"),
        id.into(),
    ])
}
