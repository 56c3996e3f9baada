//! Enum types for flagdeck entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PERMISSIONS
// ============================================================================

/// Capability covering whole-project administrative actions.
///
/// The server exchanges these as their integer discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProjectPermission {
    ManageUsers = 0,
    ManageFeatureFlags = 1,
    ManageScopes = 2,
    ViewApiKey = 3,
    RegenerateApiKey = 4,
    ManageProjectSettings = 5,
    DeleteProject = 6,
}

impl ProjectPermission {
    /// Every project permission, in display order.
    pub fn all() -> [ProjectPermission; 7] {
        [
            Self::ManageUsers,
            Self::ManageFeatureFlags,
            Self::ManageScopes,
            Self::ViewApiKey,
            Self::RegenerateApiKey,
            Self::ManageProjectSettings,
            Self::DeleteProject,
        ]
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ManageUsers => "Manage Users",
            Self::ManageFeatureFlags => "Manage Feature Flags",
            Self::ManageScopes => "Manage Scopes",
            Self::ViewApiKey => "View API Key",
            Self::RegenerateApiKey => "Regenerate API Key",
            Self::ManageProjectSettings => "Manage Project Settings",
            Self::DeleteProject => "Delete Project",
        }
    }
}

impl TryFrom<u8> for ProjectPermission {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::all()
            .into_iter()
            .find(|p| *p as u8 == value)
            .ok_or_else(|| format!("unknown project permission {}", value))
    }
}

impl From<ProjectPermission> for u8 {
    fn from(value: ProjectPermission) -> Self {
        value as u8
    }
}

impl fmt::Display for ProjectPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Capability covering read/update of flag values within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ScopePermission {
    ReadFeatureFlags = 0,
    UpdateFeatureFlags = 1,
}

impl ScopePermission {
    /// Every scope permission, in display order.
    pub fn all() -> [ScopePermission; 2] {
        [Self::ReadFeatureFlags, Self::UpdateFeatureFlags]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ReadFeatureFlags => "Read Feature Flags",
            Self::UpdateFeatureFlags => "Update Feature Flags",
        }
    }
}

impl TryFrom<u8> for ScopePermission {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ReadFeatureFlags),
            1 => Ok(Self::UpdateFeatureFlags),
            other => Err(format!("unknown scope permission {}", other)),
        }
    }
}

impl From<ScopePermission> for u8 {
    fn from(value: ScopePermission) -> Self {
        value as u8
    }
}

impl fmt::Display for ScopePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// ROLES
// ============================================================================

/// Global role of a user account.
///
/// Serialized by name. The auth endpoints send the name while the user
/// endpoints send the integer code, so both are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "GlobalRoleRepr")]
pub enum GlobalRole {
    #[default]
    User,
    Admin,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GlobalRoleRepr {
    Name(String),
    Code(u8),
}

impl TryFrom<GlobalRoleRepr> for GlobalRole {
    type Error = String;

    fn try_from(value: GlobalRoleRepr) -> Result<Self, Self::Error> {
        match value {
            GlobalRoleRepr::Name(name) => name.parse(),
            GlobalRoleRepr::Code(0) => Ok(Self::User),
            GlobalRoleRepr::Code(1) => Ok(Self::Admin),
            GlobalRoleRepr::Code(other) => Err(format!("unknown global role {}", other)),
        }
    }
}

impl FromStr for GlobalRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" | "user" => Ok(Self::User),
            "Admin" | "admin" => Ok(Self::Admin),
            other => Err(format!("unknown global role {}", other)),
        }
    }
}

impl fmt::Display for GlobalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("User"),
            Self::Admin => f.write_str("Admin"),
        }
    }
}

// ============================================================================
// ENTITY TYPE
// ============================================================================

/// Entity type discriminator used in errors, cache keys and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Project,
    Scope,
    FeatureFlag,
    FeatureFlagValue,
    ProjectUser,
    User,
    Permissions,
    Session,
}

impl EntityType {
    /// Lower-case noun used in user-facing messages.
    pub fn noun(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Scope => "scope",
            Self::FeatureFlag => "flag",
            Self::FeatureFlagValue => "flag value",
            Self::ProjectUser => "user",
            Self::User => "user",
            Self::Permissions => "permissions",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}
