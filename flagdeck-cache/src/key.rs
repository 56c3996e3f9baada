//! Hierarchical cache keys.
//!
//! Every key renders to a list of segments rooted at its entity family
//! (`projects`, `scopes`, `feature-flags`, `project-users`, `users`). Two
//! families never share a root, so keys from independent hierarchies cannot
//! alias. A key descends from another when the other's segments are a prefix
//! of its own; invalidation walks that relation.

use flagdeck_core::{EntityType, FeatureFlagId, ProjectId, ScopeId, UserId};
use std::fmt;

const PROJECTS: &str = "projects";
const SCOPES: &str = "scopes";
const FEATURE_FLAGS: &str = "feature-flags";
const PROJECT_USERS: &str = "project-users";
const USERS: &str = "users";

/// Address of one cached server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// `["projects","list"]`
    Projects,
    /// `["projects","detail",id]`
    Project(ProjectId),
    /// `["projects","detail",id,"permissions"]`, the signed-in user's grants.
    MyPermissions(ProjectId),
    /// `["scopes","list",projectId]`
    Scopes(ProjectId),
    /// `["scopes","detail",scopeId]`
    Scope(ScopeId),
    /// `["feature-flags","project",projectId]`
    FeatureFlags(ProjectId),
    /// `["feature-flags","detail",flagId]`
    FeatureFlag(FeatureFlagId),
    /// `["project-users","list",projectId]`
    ProjectUsers(ProjectId),
    /// `["project-users","detail",projectId,userId]`
    ProjectUser(ProjectId, UserId),
    /// `["project-users","available",projectId]`
    AvailableUsers(ProjectId),
    /// `["users","list"]`
    Users,
    /// `["users","detail",userId]`
    User(UserId),
}

impl CacheKey {
    pub fn segments(&self) -> Vec<String> {
        match self {
            Self::Projects => segs(&[PROJECTS, "list"]),
            Self::Project(id) => vec![PROJECTS.into(), "detail".into(), id.to_string()],
            Self::MyPermissions(id) => vec![
                PROJECTS.into(),
                "detail".into(),
                id.to_string(),
                "permissions".into(),
            ],
            Self::Scopes(pid) => vec![SCOPES.into(), "list".into(), pid.to_string()],
            Self::Scope(id) => vec![SCOPES.into(), "detail".into(), id.to_string()],
            Self::FeatureFlags(pid) => {
                vec![FEATURE_FLAGS.into(), "project".into(), pid.to_string()]
            }
            Self::FeatureFlag(id) => vec![FEATURE_FLAGS.into(), "detail".into(), id.to_string()],
            Self::ProjectUsers(pid) => vec![PROJECT_USERS.into(), "list".into(), pid.to_string()],
            Self::ProjectUser(pid, uid) => vec![
                PROJECT_USERS.into(),
                "detail".into(),
                pid.to_string(),
                uid.to_string(),
            ],
            Self::AvailableUsers(pid) => {
                vec![PROJECT_USERS.into(), "available".into(), pid.to_string()]
            }
            Self::Users => segs(&[USERS, "list"]),
            Self::User(id) => vec![USERS.into(), "detail".into(), id.to_string()],
        }
    }

    /// True when `ancestor`'s segments prefix this key's. A key descends from itself.
    pub fn descends_from(&self, ancestor: &CacheKey) -> bool {
        KeyPrefix::from(*ancestor).matches(self)
    }

    /// Entity family the cached value belongs to.
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Projects | Self::Project(_) => EntityType::Project,
            Self::MyPermissions(_) => EntityType::Permissions,
            Self::Scopes(_) | Self::Scope(_) => EntityType::Scope,
            Self::FeatureFlags(_) | Self::FeatureFlag(_) => EntityType::FeatureFlag,
            Self::ProjectUsers(_) | Self::ProjectUser(..) | Self::AvailableUsers(_) => {
                EntityType::ProjectUser
            }
            Self::Users | Self::User(_) => EntityType::User,
        }
    }

    /// The project this key is scoped to, if any.
    pub fn project_id(&self) -> Option<ProjectId> {
        match self {
            Self::Project(id)
            | Self::MyPermissions(id)
            | Self::Scopes(id)
            | Self::FeatureFlags(id)
            | Self::ProjectUsers(id)
            | Self::ProjectUser(id, _)
            | Self::AvailableUsers(id) => Some(*id),
            _ => None,
        }
    }
}

fn segs(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments().join("/"))
    }
}

/// A subtree of the key space, for bulk invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
    segments: Vec<String>,
}

impl KeyPrefix {
    pub fn projects() -> Self {
        Self::root(PROJECTS)
    }

    pub fn scopes() -> Self {
        Self::root(SCOPES)
    }

    pub fn feature_flags() -> Self {
        Self::root(FEATURE_FLAGS)
    }

    pub fn project_users() -> Self {
        Self::root(PROJECT_USERS)
    }

    pub fn users() -> Self {
        Self::root(USERS)
    }

    fn root(segment: &str) -> Self {
        Self {
            segments: vec![segment.to_string()],
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        let segments = key.segments();
        segments.len() >= self.segments.len()
            && segments.iter().zip(&self.segments).all(|(a, b)| a == b)
    }
}

impl From<CacheKey> for KeyPrefix {
    fn from(key: CacheKey) -> Self {
        Self {
            segments: key.segments(),
        }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/*", self.segments.join("/"))
    }
}
