//! FLAGDECK Client
//!
//! Async admin client for the flagdeck feature-flag API.
//!
//! - [`RestClient`] talks to the server; [`FlagApi`] is the seam tests fake.
//! - [`AdminClient`] serves typed queries through the cache and runs every
//!   write as an optimistic mutation with snapshot rollback.
//! - [`Session`] owns the signed-in user and clears the cache on sign-out.

pub mod admin;
pub mod api;
pub mod config;
pub mod error;
pub mod mutation;
pub mod notifications;
pub mod query;
pub mod rest;
pub mod session;

pub use admin::AdminClient;
pub use api::{ApiClientError, ApiResult, FlagApi};
pub use config::{ClientConfig, ConfigError, LogConfig};
pub use error::{AppError, ClientError, ClientResult, ErrorKind};
pub use mutation::{MutationKind, MutationState, OptimisticMutation, Settled};
pub use notifications::{Notification, NotificationAction, NotificationCenter, NotificationLevel};
pub use query::{Observer, QueryClient};
pub use rest::RestClient;
pub use session::{Session, SessionEvent, SignOutReason};

// Re-exported so callers need only this crate.
pub use flagdeck_cache as cache;
pub use flagdeck_core as core;
