//! The in-memory cache store.
//!
//! Values are held as `serde_json::Value` so a snapshot of any key can be
//! captured and restored without knowing its type. Typed accessors convert at
//! the boundary.
//!
//! Every operation takes the state lock once and runs to completion, so a
//! read never observes a half-applied update. Events are published after the
//! lock is released.

use crate::stats::Counters;
use crate::{CacheError, CacheKey, CacheRead, CacheResult, CacheStats, KeyPrefix};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Change notification published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A new value was written.
    Updated(CacheKey),
    /// The key was marked stale; active observers should refetch.
    Invalidated(CacheKey),
    /// The entry was evicted.
    Removed(CacheKey),
    /// Everything was dropped (sign-out).
    Cleared,
}

impl CacheEvent {
    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            Self::Updated(key) | Self::Invalidated(key) | Self::Removed(key) => Some(key),
            Self::Cleared => None,
        }
    }
}

/// Claim on the right to write a fetched value for one key.
///
/// Only the most recently issued ticket for a key is current. Cancelling the
/// key, invalidating it, removing it or starting a newer fetch makes an older
/// ticket stale; its result is then discarded instead of written.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a fetch ticket must be completed or abandoned"]
pub struct FetchTicket {
    key: CacheKey,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    cached_at: DateTime<Utc>,
    stale: bool,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<CacheKey, Entry>,
    in_flight: HashMap<CacheKey, u64>,
    watched: HashMap<CacheKey, usize>,
    next_ticket: u64,
}

impl State {
    /// Keys under `prefix` with data, an active observer or a fetch in flight.
    fn known_keys(&self, prefix: &KeyPrefix) -> Vec<CacheKey> {
        let mut seen = HashSet::new();
        self.entries
            .keys()
            .chain(self.watched.keys())
            .chain(self.in_flight.keys())
            .filter(|key| prefix.matches(key))
            .filter(|key| seen.insert(**key))
            .copied()
            .collect()
    }
}

/// Process-wide store of server responses for one signed-in session.
pub struct CacheStore {
    state: RwLock<State>,
    events: broadcast::Sender<CacheEvent>,
    counters: Counters,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: RwLock::new(State::default()),
            events,
            counters: Counters::default(),
        }
    }

    fn read(&self) -> CacheResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| CacheError::LockPoisoned)
    }

    fn write(&self) -> CacheResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| CacheError::LockPoisoned)
    }

    fn publish(&self, events: impl IntoIterator<Item = CacheEvent>) {
        for event in events {
            // No receivers is fine.
            let _ = self.events.send(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Current value for `key`. Never fetches.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheResult<Option<CacheRead<T>>> {
        let entry = {
            let state = self.read()?;
            state.entries.get(key).cloned()
        };
        match entry {
            Some(entry) => {
                Counters::bump(&self.counters.hits);
                let value = serde_json::from_value(entry.value)
                    .map_err(|e| CacheError::serialization(key, e))?;
                Ok(Some(CacheRead::from_cache(value, entry.cached_at, entry.stale)))
            }
            None => {
                Counters::bump(&self.counters.misses);
                Ok(None)
            }
        }
    }

    /// Untyped value for `key`, as captured by snapshots.
    pub fn get_raw(&self, key: &CacheKey) -> CacheResult<Option<Value>> {
        Ok(self.read()?.entries.get(key).map(|e| e.value.clone()))
    }

    pub fn contains(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.read()?.entries.contains_key(key))
    }

    pub fn is_stale(&self, key: &CacheKey) -> CacheResult<Option<bool>> {
        Ok(self.read()?.entries.get(key).map(|e| e.stale))
    }

    /// Cached keys under `prefix`.
    pub fn keys(&self, prefix: &KeyPrefix) -> CacheResult<Vec<CacheKey>> {
        Ok(self
            .read()?
            .entries
            .keys()
            .filter(|key| prefix.matches(key))
            .copied()
            .collect())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Replace the value at `key` and clear its stale mark.
    pub fn set<T: Serialize>(&self, key: &CacheKey, value: &T) -> CacheResult<()> {
        let value = serde_json::to_value(value).map_err(|e| CacheError::serialization(key, e))?;
        self.set_raw(key, value)
    }

    pub fn set_raw(&self, key: &CacheKey, value: Value) -> CacheResult<()> {
        self.write()?.entries.insert(
            *key,
            Entry {
                value,
                cached_at: Utc::now(),
                stale: false,
            },
        );
        self.publish([CacheEvent::Updated(*key)]);
        Ok(())
    }

    /// Read-modify-write of an existing entry. Returns false when absent.
    pub fn update<T, F>(&self, key: &CacheKey, f: F) -> CacheResult<bool>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(T) -> T,
    {
        {
            let mut state = self.write()?;
            let Some(entry) = state.entries.get_mut(key) else {
                return Ok(false);
            };
            let current: T = serde_json::from_value(entry.value.clone())
                .map_err(|e| CacheError::serialization(key, e))?;
            entry.value =
                serde_json::to_value(f(current)).map_err(|e| CacheError::serialization(key, e))?;
            entry.cached_at = Utc::now();
            entry.stale = false;
        }
        self.publish([CacheEvent::Updated(*key)]);
        Ok(true)
    }

    /// Put a snapshot back: `Some` is written, `None` evicts.
    pub fn restore(&self, key: &CacheKey, snapshot: Option<Value>) -> CacheResult<()> {
        match snapshot {
            Some(value) => self.set_raw(key, value),
            None => self.remove(key).map(|_| ()),
        }
    }

    // ========================================================================
    // INVALIDATION AND EVICTION
    // ========================================================================

    /// Mark `key` and every descendant stale. Returns how many keys were affected.
    ///
    /// Keys with an active observer but no data are included, so the observer
    /// still receives `Invalidated` and fetches.
    pub fn invalidate(&self, key: &CacheKey) -> CacheResult<usize> {
        self.invalidate_prefix(&KeyPrefix::from(*key))
    }

    pub fn invalidate_prefix(&self, prefix: &KeyPrefix) -> CacheResult<usize> {
        let affected = {
            let mut state = self.write()?;
            let affected = state.known_keys(prefix);
            for key in &affected {
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.stale = true;
                }
                // A fetch issued before this point may carry pre-write data.
                state.in_flight.remove(key);
            }
            affected
        };
        for key in &affected {
            Counters::bump(&self.counters.invalidations);
            tracing::trace!(key = %key, "cache key invalidated");
        }
        let count = affected.len();
        self.publish(affected.into_iter().map(CacheEvent::Invalidated));
        Ok(count)
    }

    /// Evict exactly `key` and cancel its in-flight fetch.
    pub fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let removed = {
            let mut state = self.write()?;
            state.in_flight.remove(key);
            state.entries.remove(key).is_some()
        };
        if removed {
            Counters::bump(&self.counters.evictions);
            self.publish([CacheEvent::Removed(*key)]);
        }
        Ok(removed)
    }

    /// Drop every entry and cancel every fetch.
    pub fn clear(&self) -> CacheResult<()> {
        {
            let mut state = self.write()?;
            state.entries.clear();
            state.in_flight.clear();
        }
        tracing::debug!("cache cleared");
        self.publish([CacheEvent::Cleared]);
        Ok(())
    }

    // ========================================================================
    // FETCH COORDINATION
    // ========================================================================

    /// Cancel the outstanding fetch for `key`, if any.
    ///
    /// The transport is not aborted. Its result is discarded when it lands.
    pub fn cancel_in_flight(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.write()?.in_flight.remove(key).is_some())
    }

    /// Start a fetch for `key`, superseding any earlier one.
    pub fn begin_fetch(&self, key: &CacheKey) -> CacheResult<FetchTicket> {
        let mut state = self.write()?;
        state.next_ticket += 1;
        let generation = state.next_ticket;
        state.in_flight.insert(*key, generation);
        Ok(FetchTicket {
            key: *key,
            generation,
        })
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> CacheResult<bool> {
        Ok(self.read()?.in_flight.get(&ticket.key) == Some(&ticket.generation))
    }

    pub fn has_fetch_in_flight(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.read()?.in_flight.contains_key(key))
    }

    /// Write a fetched value if `ticket` is still current. Returns whether it was written.
    pub fn complete_fetch<T: Serialize>(&self, ticket: FetchTicket, value: &T) -> CacheResult<bool> {
        let key = ticket.key;
        let value = serde_json::to_value(value).map_err(|e| CacheError::serialization(&key, e))?;
        let written = {
            let mut state = self.write()?;
            if state.in_flight.get(&key) == Some(&ticket.generation) {
                state.in_flight.remove(&key);
                state.entries.insert(
                    key,
                    Entry {
                        value,
                        cached_at: Utc::now(),
                        stale: false,
                    },
                );
                true
            } else {
                false
            }
        };
        if written {
            self.publish([CacheEvent::Updated(key)]);
        } else {
            Counters::bump(&self.counters.discarded_fetches);
            tracing::debug!(key = %key, "discarded result of cancelled fetch");
        }
        Ok(written)
    }

    /// Release a ticket whose fetch failed.
    pub fn abandon_fetch(&self, ticket: FetchTicket) -> CacheResult<()> {
        let mut state = self.write()?;
        if state.in_flight.get(&ticket.key) == Some(&ticket.generation) {
            state.in_flight.remove(&ticket.key);
        }
        Ok(())
    }

    // ========================================================================
    // OBSERVERS
    // ========================================================================

    /// Register an active observer of `key` until the guard is dropped.
    pub fn watch(self: &Arc<Self>, key: CacheKey) -> CacheResult<KeyWatch> {
        *self.write()?.watched.entry(key).or_insert(0) += 1;
        Ok(KeyWatch {
            store: Arc::clone(self),
            key,
        })
    }

    pub fn observer_count(&self, key: &CacheKey) -> CacheResult<usize> {
        Ok(self.read()?.watched.get(key).copied().unwrap_or(0))
    }

    pub fn stats(&self) -> CacheResult<CacheStats> {
        let entries = self.read()?.entries.len();
        Ok(self.counters.snapshot(entries))
    }
}

/// Observer registration for one key.
#[derive(Debug)]
pub struct KeyWatch {
    store: Arc<CacheStore>,
    key: CacheKey,
}

impl KeyWatch {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for KeyWatch {
    fn drop(&mut self) {
        if let Ok(mut state) = self.store.state.write() {
            if let Some(count) = state.watched.get_mut(&self.key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.watched.remove(&self.key);
                }
            }
        }
    }
}
