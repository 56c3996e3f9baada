//! Core entity structures
//!
//! These are read-through copies of server-owned records. The client never
//! treats them as authoritative; every write is followed by a refetch.

use crate::{
    FeatureFlagId, FeatureFlagValueId, GlobalRole, ProjectId, ProjectPermission, ProjectUserId,
    ScopeId, ScopePermission, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scope permissions keyed by scope.
pub type ScopePermissionMap = BTreeMap<ScopeId, Vec<ScopePermission>>;

/// Project as returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    /// Immutable, unique.
    pub alias: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub is_archived: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Project with the detail-only fields (API key and counts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub api_key: Option<String>,
    pub member_count: u32,
    pub scope_count: u32,
    pub feature_flag_count: u32,
}

impl ProjectDetail {
    pub fn id(&self) -> ProjectId {
        self.project.id
    }

    /// The API key with everything but the last four characters masked.
    pub fn masked_api_key(&self) -> Option<String> {
        self.api_key.as_deref().map(mask_secret)
    }
}

fn mask_secret(secret: &str) -> String {
    let len = secret.chars().count();
    let visible = len.min(4);
    let mut masked: String = std::iter::repeat('•').take(len - visible).collect();
    masked.extend(secret.chars().skip(len - visible));
    masked
}

/// A named environment within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub id: ScopeId,
    pub project_id: ProjectId,
    /// Immutable.
    pub alias: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
}

/// The boolean value of one flag in one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagValue {
    pub id: FeatureFlagValueId,
    pub scope_id: ScopeId,
    pub scope_name: String,
    pub scope_alias: String,
    pub is_enabled: bool,
    pub updated_at: Timestamp,
}

/// A named toggle with one value per scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub id: FeatureFlagId,
    pub project_id: ProjectId,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub values: Vec<FeatureFlagValue>,
}

impl FeatureFlag {
    /// The value row for `scope_id`, if the flag has one.
    pub fn value_for(&self, scope_id: ScopeId) -> Option<&FeatureFlagValue> {
        self.values.iter().find(|v| v.scope_id == scope_id)
    }

    /// Copy of this flag with exactly the value for `scope_id` replaced.
    ///
    /// Values for every other scope are carried over untouched. When the
    /// flag has no row for `scope_id` the copy equals `self`.
    pub fn with_scope_value(&self, scope_id: ScopeId, is_enabled: bool, at: Timestamp) -> Self {
        let values = self
            .values
            .iter()
            .map(|v| {
                if v.scope_id == scope_id {
                    FeatureFlagValue {
                        is_enabled,
                        updated_at: at,
                        ..v.clone()
                    }
                } else {
                    v.clone()
                }
            })
            .collect();
        Self {
            values,
            ..self.clone()
        }
    }
}

/// A user's membership in one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUser {
    pub id: ProjectUserId,
    pub user_id: UserId,
    pub username: String,
    pub full_name: String,
    pub joined_at: Timestamp,
    #[serde(default)]
    pub project_permissions: Vec<ProjectPermission>,
    #[serde(default)]
    pub scope_permissions: ScopePermissionMap,
}

impl ProjectUser {
    /// Copy with both permission fields replaced wholesale.
    pub fn with_permissions(
        &self,
        project_permissions: Vec<ProjectPermission>,
        scope_permissions: ScopePermissionMap,
    ) -> Self {
        Self {
            project_permissions,
            scope_permissions,
            ..self.clone()
        }
    }
}

/// A global user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: UserId,
    /// Immutable.
    pub username: String,
    pub full_name: String,
    pub global_role: GlobalRole,
    #[serde(default)]
    pub must_change_password: bool,
}

/// Candidate for a project invitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableUser {
    pub user_id: UserId,
    pub username: String,
    pub full_name: String,
    pub is_already_member: bool,
}

/// The signed-in user's own permissions for one project.
///
/// Drives every visibility and enabled-state gate in the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyPermissions {
    pub user_id: UserId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub project_permissions: Vec<ProjectPermission>,
    #[serde(default)]
    pub scope_permissions: ScopePermissionMap,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;
    use chrono::{TimeZone, Utc};

    fn value(scope_id: ScopeId, enabled: bool) -> FeatureFlagValue {
        FeatureFlagValue {
            id: FeatureFlagValueId::now_v7(),
            scope_id,
            scope_name: "Scope".to_string(),
            scope_alias: "scope".to_string(),
            is_enabled: enabled,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn flag(values: Vec<FeatureFlagValue>) -> FeatureFlag {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        FeatureFlag {
            id: FeatureFlagId::now_v7(),
            project_id: ProjectId::now_v7(),
            key: "checkout-v2".to_string(),
            name: "Checkout v2".to_string(),
            description: None,
            created_at: at,
            updated_at: at,
            values,
        }
    }

    #[test]
    fn test_with_scope_value_touches_only_matching_scope() {
        let prod = ScopeId::now_v7();
        let dev = ScopeId::now_v7();
        let original = flag(vec![value(prod, false), value(dev, true)]);
        let at = Utc::now();

        let patched = original.with_scope_value(prod, true, at);

        assert!(patched.value_for(prod).unwrap().is_enabled);
        assert_eq!(patched.value_for(prod).unwrap().updated_at, at);
        assert_eq!(patched.value_for(dev), original.value_for(dev));
        assert_eq!(patched.name, original.name);
    }

    #[test]
    fn test_with_scope_value_unknown_scope_is_identity() {
        let original = flag(vec![value(ScopeId::now_v7(), false)]);
        let patched = original.with_scope_value(ScopeId::now_v7(), true, Utc::now());
        assert_eq!(patched, original);
    }

    #[test]
    fn test_masked_api_key() {
        let at = Utc::now();
        let mut detail = ProjectDetail {
            project: Project {
                id: ProjectId::now_v7(),
                alias: "shop".to_string(),
                name: "Shop".to_string(),
                description: None,
                created_by: "admin".to_string(),
                is_archived: false,
                created_at: at,
                updated_at: at,
            },
            api_key: Some("sk_live_abcd1234".to_string()),
            member_count: 1,
            scope_count: 2,
            feature_flag_count: 3,
        };
        assert_eq!(detail.masked_api_key().unwrap(), "••••••••••••1234");

        detail.api_key = Some("abc".to_string());
        assert_eq!(detail.masked_api_key().unwrap(), "abc");

        detail.api_key = None;
        assert!(detail.masked_api_key().is_none());
    }

    #[test]
    fn test_project_detail_wire_format_is_flat() {
        let json = serde_json::json!({
            "id": "0190b6a4-0000-7000-8000-000000000001",
            "alias": "shop",
            "name": "Shop",
            "description": null,
            "createdBy": "admin",
            "isArchived": true,
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-02T00:00:00Z",
            "apiKey": null,
            "memberCount": 4,
            "scopeCount": 3,
            "featureFlagCount": 9
        });
        let detail: ProjectDetail = serde_json::from_value(json).unwrap();
        assert!(detail.project.is_archived);
        assert_eq!(detail.feature_flag_count, 9);
    }

    #[test]
    fn test_scope_permission_map_keys_are_scope_ids() {
        let scope = ScopeId::now_v7();
        let json = serde_json::json!({
            "userId": UserId::now_v7(),
            "projectId": ProjectId::now_v7(),
            "projectPermissions": [0, 1],
            "scopePermissions": { (scope.to_string()): [1] }
        });
        let perms: MyPermissions = serde_json::from_value(json).unwrap();
        assert_eq!(
            perms.scope_permissions.get(&scope),
            Some(&vec![ScopePermission::UpdateFeatureFlags])
        );
    }
}
