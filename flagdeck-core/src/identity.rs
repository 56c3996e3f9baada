//! Identity types for flagdeck entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Common behaviour of the strongly-typed entity identifiers.
///
/// Every id is a transparent wrapper around a [`Uuid`]; on the wire it is the
/// bare UUID string, so the newtypes cost nothing at the API boundary while
/// keeping a `ScopeId` from being passed where a `ProjectId` is expected.
pub trait EntityIdType: Copy + Eq + std::hash::Hash + fmt::Display {
    /// Wrap an existing UUID.
    fn new(uuid: Uuid) -> Self;

    /// Get the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// The nil id, useful as a placeholder in tests.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    /// Generate a fresh timestamp-sortable id.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

entity_id!(
    /// Identifier of a project.
    ProjectId
);
entity_id!(
    /// Identifier of a scope (environment) inside a project.
    ScopeId
);
entity_id!(
    /// Identifier of a feature flag.
    FeatureFlagId
);
entity_id!(
    /// Identifier of a single flag value row (one per flag and scope).
    FeatureFlagValueId
);
entity_id!(
    /// Identifier of a global user account.
    UserId
);
entity_id!(
    /// Identifier of a project membership row.
    ProjectUserId
);
