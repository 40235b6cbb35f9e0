//! Cache key and tag definitions.
//!
//! A [`QueryKey`] is derived deterministically from the query name plus its
//! positional and keyword arguments, so the same call always lands on the
//! same entry regardless of process or keyword order. A [`Tag`] names a
//! logical invalidation group such as `user_42_blocks`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::error::CacheError;

const MAX_TAG_LEN: usize = 128;
const SHORT_HASH_LEN: usize = 16;

/// Invalidation group label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Tag(String);

pub type TagSet = BTreeSet<Tag>;

impl Tag {
    /// Validates a caller supplied tag: non-empty, at most 128 bytes, no whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, CacheError> {
        let value = value.into();
        if value.is_empty() {
            return Err(CacheError::invalid_tag(value, "tag must not be empty"));
        }
        if value.len() > MAX_TAG_LEN {
            return Err(CacheError::invalid_tag(value, "tag exceeds 128 bytes"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(CacheError::invalid_tag(value, "tag must not contain whitespace"));
        }
        Ok(Self(value))
    }

    /// Tag for one owner's collection, e.g. `user_42_blocks`.
    pub fn scoped(owner: &'static str, id: impl fmt::Display, collection: &'static str) -> Self {
        Self(format!("{owner}_{id}_{collection}"))
    }

    /// Tag covering every entry of a collection, e.g. `blocks_all`.
    pub fn class_wide(collection: &'static str) -> Self {
        Self(format!("{collection}_all"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic key of a cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    query: &'static str,
    digest: String,
}

impl QueryKey {
    pub fn builder(query: &'static str) -> KeyBuilder {
        KeyBuilder::new(query)
    }

    pub fn query(&self) -> &'static str {
        self.query
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Abbreviated digest used in profiling samples and logs.
    pub fn short_hash(&self) -> &str {
        &self.digest[..SHORT_HASH_LEN]
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.query, self.short_hash())
    }
}

/// Collects the arguments of a query call before hashing them into a [`QueryKey`].
#[derive(Debug)]
pub struct KeyBuilder {
    query: &'static str,
    positional: Vec<String>,
    keyword: BTreeMap<&'static str, String>,
    error: Option<serde_json::Error>,
}

impl KeyBuilder {
    fn new(query: &'static str) -> Self {
        Self {
            query,
            positional: Vec::new(),
            keyword: BTreeMap::new(),
            error: None,
        }
    }

    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        if let Some(encoded) = self.encode(value) {
            self.positional.push(encoded);
        }
        self
    }

    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &'static str, value: &T) -> Self {
        if let Some(encoded) = self.encode(value) {
            self.keyword.insert(name, encoded);
        }
        self
    }

    pub fn build(self) -> Result<QueryKey, CacheError> {
        if let Some(source) = self.error {
            return Err(CacheError::KeyEncoding {
                query: self.query,
                source,
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(self.query.as_bytes());
        for value in &self.positional {
            hasher.update([0x1f]);
            hasher.update(value.as_bytes());
        }
        hasher.update([0x1e]);
        for (name, value) in &self.keyword {
            hasher.update([0x1f]);
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }

        Ok(QueryKey {
            query: self.query,
            digest: hex::encode(hasher.finalize()),
        })
    }

    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Option<String> {
        if self.error.is_some() {
            return None;
        }
        match serde_json::to_string(value) {
            Ok(encoded) => Some(encoded),
            Err(err) => {
                self.error = Some(err);
                None
            }
        }
    }
}
