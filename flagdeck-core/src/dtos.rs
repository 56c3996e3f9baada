//! Request and response bodies for the REST API.

use crate::{GlobalRole, ProjectPermission, ScopeId, ScopePermissionMap, Timestamp, UserId};
use serde::{Deserialize, Serialize};

// ============================================================================
// AUTH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Change-password form. `confirm_password` is checked locally and never sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    #[serde(skip)]
    pub confirm_password: String,
}

// ============================================================================
// PROJECTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Whole-record replace of the mutable project fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateApiKeyResponse {
    pub api_key: String,
    pub regenerated_at: Timestamp,
}

// ============================================================================
// SCOPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateScopeRequest {
    pub name: String,
    /// Server derives one from the name when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateScopeRequest {
    pub name: String,
    pub description: Option<String>,
}

// ============================================================================
// FEATURE FLAGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFeatureFlagRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFeatureFlagRequest {
    pub name: String,
    pub key: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFeatureFlagValueRequest {
    pub scope_id: ScopeId,
    pub is_enabled: bool,
}

// ============================================================================
// PROJECT USERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteUserRequest {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_permissions: Option<Vec<ProjectPermission>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_permissions: Option<ScopePermissionMap>,
}

impl InviteUserRequest {
    /// Build an invitation, omitting empty permission groups from the body.
    pub fn new(
        user_id: UserId,
        project_permissions: Vec<ProjectPermission>,
        scope_permissions: ScopePermissionMap,
    ) -> Self {
        Self {
            user_id,
            project_permissions: (!project_permissions.is_empty()).then_some(project_permissions),
            scope_permissions: (!scope_permissions.is_empty()).then_some(scope_permissions),
        }
    }

    pub fn total_permissions(&self) -> usize {
        let project = self.project_permissions.as_ref().map_or(0, Vec::len);
        let scope = self
            .scope_permissions
            .as_ref()
            .map_or(0, |m| m.values().map(Vec::len).sum());
        project + scope
    }
}

/// Whole-field replacement of both permission groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserPermissionsRequest {
    pub project_permissions: Vec<ProjectPermission>,
    pub scope_permissions: ScopePermissionMap,
}

// ============================================================================
// GLOBAL USERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub full_name: String,
    pub temporary_password: String,
    pub global_role: GlobalRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub full_name: String,
    pub global_role: GlobalRole,
}
