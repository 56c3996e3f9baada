//! FLAGDECK Cache - client-side query cache.
//!
//! A store of server responses addressed by hierarchical [`CacheKey`]s.
//!
//! # Freshness
//!
//! Staleness is explicit. Readers state their tolerance with [`Freshness`]
//! and every read comes back as a [`CacheRead<T>`] carrying its age and
//! whether the entry has been invalidated.
//!
//! # Cancellation
//!
//! Fetches are cooperative. A reader takes a [`FetchTicket`] before awaiting
//! the network and hands it back with the result; if the key was cancelled,
//! invalidated or removed in the meantime the result is dropped. This is how
//! an optimistic write is protected from an older read landing after it.
//!
//! ```ignore
//! let ticket = store.begin_fetch(&key)?;
//! let value = api.list_projects().await?;
//! if !store.complete_fetch(ticket, &value)? {
//!     // superseded; keep what is cached
//! }
//! ```

pub mod error;
pub mod freshness;
pub mod key;
pub mod stats;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use freshness::{CacheRead, Freshness};
pub use key::{CacheKey, KeyPrefix};
pub use stats::CacheStats;
pub use store::{CacheEvent, CacheStore, FetchTicket, KeyWatch, DEFAULT_EVENT_CAPACITY};
