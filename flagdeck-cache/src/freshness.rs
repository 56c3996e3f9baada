//! Freshness contracts for cache reads.
//!
//! Callers state their staleness tolerance when reading through the cache,
//! and every read comes back wrapped in a [`CacheRead`] that says how old it is.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Freshness requirement for cache reads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Serve a cached value that is not marked stale and is no older than
    /// `max_staleness`. Otherwise refetch.
    BestEffort {
        /// Maximum acceptable age for cached data.
        max_staleness: Duration,
    },

    /// Always revalidate with the server.
    #[default]
    Consistent,
}

impl Freshness {
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    pub fn consistent() -> Self {
        Self::Consistent
    }

    pub fn is_best_effort(&self) -> bool {
        matches!(self, Self::BestEffort { .. })
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Get the max staleness for BestEffort, or zero for Consistent.
    pub fn max_staleness(&self) -> Duration {
        match self {
            Self::BestEffort { max_staleness } => *max_staleness,
            Self::Consistent => Duration::ZERO,
        }
    }

    /// Whether a cached read may be served under this contract.
    pub fn accepts<T>(&self, read: &CacheRead<T>) -> bool {
        match self {
            Self::BestEffort { max_staleness } => {
                !read.is_stale() && read.staleness() <= *max_staleness
            }
            Self::Consistent => false,
        }
    }
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    /// When this value was written (or fetched from the server).
    cached_at: DateTime<Utc>,
    /// Set once the entry has been invalidated and awaits a refetch.
    stale: bool,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// Create a new cache read from a cache hit.
    pub fn from_cache(value: T, cached_at: DateTime<Utc>, stale: bool) -> Self {
        Self {
            value,
            cached_at,
            stale,
            was_cache_hit: true,
        }
    }

    /// Create a new cache read from a server fetch (cache miss).
    pub fn from_server(value: T) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            stale: false,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// True once invalidated, until the next write.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Time since the value was cached.
    pub fn staleness(&self) -> Duration {
        let now = Utc::now();
        if now > self.cached_at {
            (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            stale: self.stale,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness_best_effort() {
        let freshness = Freshness::best_effort(Duration::from_secs(60));
        assert!(freshness.is_best_effort());
        assert!(!freshness.is_consistent());
        assert_eq!(freshness.max_staleness(), Duration::from_secs(60));
    }

    #[test]
    fn test_freshness_default_is_consistent() {
        let freshness = Freshness::default();
        assert!(freshness.is_consistent());
        assert_eq!(freshness.max_staleness(), Duration::ZERO);
    }

    #[test]
    fn test_best_effort_rejects_stale_entries() {
        let freshness = Freshness::best_effort(Duration::from_secs(60));
        let fresh = CacheRead::from_cache("v", Utc::now(), false);
        let invalidated = CacheRead::from_cache("v", Utc::now(), true);
        let old = CacheRead::from_cache("v", Utc::now() - chrono::Duration::seconds(120), false);

        assert!(freshness.accepts(&fresh));
        assert!(!freshness.accepts(&invalidated));
        assert!(!freshness.accepts(&old));
        assert!(!Freshness::Consistent.accepts(&fresh));
    }

    #[test]
    fn test_cache_read_staleness() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let read = CacheRead::from_cache("test", past, false);

        let staleness = read.staleness();
        assert!(staleness >= Duration::from_secs(4));
        assert!(staleness <= Duration::from_secs(10));
    }

    #[test]
    fn test_cache_read_from_server_is_miss() {
        let read = CacheRead::from_server(42i32).map(|v| v.to_string());
        assert!(read.was_cache_miss());
        assert!(!read.is_stale());
        assert_eq!(read.into_value(), "42");
    }
}
