use thiserror::Error;

/// Caller mistakes rejected at the cache boundary.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache tag `{tag}`: {reason}")]
    InvalidTag { tag: String, reason: &'static str },
    #[error("cache key argument for `{query}` could not be encoded: {source}")]
    KeyEncoding {
        query: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub fn invalid_tag(tag: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidTag {
            tag: tag.into(),
            reason,
        }
    }
}
