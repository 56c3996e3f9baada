//! Cache error types.

use crate::CacheKey;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Cached value at {key} could not be (de)serialized: {reason}")]
    Serialization { key: CacheKey, reason: String },
}

impl CacheError {
    pub(crate) fn serialization(key: &CacheKey, err: serde_json::Error) -> Self {
        Self::Serialization {
            key: *key,
            reason: err.to_string(),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
