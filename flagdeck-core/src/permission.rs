//! Permission evaluation.
//!
//! Pure, synchronous checks over the signed-in user and their
//! [`MyPermissions`] for a project. Nothing here touches the network or the
//! cache. Absent inputs fail closed.
//!
//! Admins bypass project-level checks only. Scope permissions gate flag
//! values in live environments and must be granted explicitly, even to an
//! admin.

use crate::{
    GlobalRole, MyPermissions, ProjectPermission, ScopeId, ScopePermission, ScopePermissionMap,
    User,
};

/// True iff `permission` is granted at project level.
pub fn has_project_permission(
    perms: Option<&MyPermissions>,
    permission: ProjectPermission,
) -> bool {
    perms.is_some_and(|p| p.project_permissions.contains(&permission))
}

/// True iff `permission` is granted for `scope_id`.
pub fn has_scope_permission(
    perms: Option<&MyPermissions>,
    scope_id: ScopeId,
    permission: ScopePermission,
) -> bool {
    perms
        .and_then(|p| p.scope_permissions.get(&scope_id))
        .is_some_and(|granted| granted.contains(&permission))
}

pub fn is_admin(user: Option<&User>) -> bool {
    user.is_some_and(|u| u.global_role == GlobalRole::Admin)
}

/// Project-level gate. Admins always pass.
pub fn can_perform_project_action(
    user: Option<&User>,
    perms: Option<&MyPermissions>,
    permission: ProjectPermission,
) -> bool {
    is_admin(user) || has_project_permission(perms, permission)
}

/// Scope-level gate. No admin bypass.
pub fn can_perform_scope_action(
    perms: Option<&MyPermissions>,
    scope_id: ScopeId,
    permission: ScopePermission,
) -> bool {
    has_scope_permission(perms, scope_id, permission)
}

// ============================================================================
// PERMISSION CONTEXT
// ============================================================================

/// Everything a project page needs to gate its actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionContext {
    pub user: Option<User>,
    pub permissions: Option<MyPermissions>,
}

impl PermissionContext {
    pub fn new(user: Option<User>, permissions: Option<MyPermissions>) -> Self {
        Self { user, permissions }
    }

    pub fn is_admin(&self) -> bool {
        is_admin(self.user.as_ref())
    }

    pub fn can_project(&self, permission: ProjectPermission) -> bool {
        can_perform_project_action(self.user.as_ref(), self.permissions.as_ref(), permission)
    }

    pub fn can_scope(&self, scope_id: ScopeId, permission: ScopePermission) -> bool {
        can_perform_scope_action(self.permissions.as_ref(), scope_id, permission)
    }

    pub fn can_manage_users(&self) -> bool {
        self.can_project(ProjectPermission::ManageUsers)
    }

    pub fn can_manage_flags(&self) -> bool {
        self.can_project(ProjectPermission::ManageFeatureFlags)
    }

    pub fn can_manage_scopes(&self) -> bool {
        self.can_project(ProjectPermission::ManageScopes)
    }

    pub fn can_view_api_key(&self) -> bool {
        self.can_project(ProjectPermission::ViewApiKey)
    }

    pub fn can_regenerate_api_key(&self) -> bool {
        self.can_project(ProjectPermission::RegenerateApiKey)
    }

    pub fn can_manage_settings(&self) -> bool {
        self.can_project(ProjectPermission::ManageProjectSettings)
    }

    pub fn can_delete_project(&self) -> bool {
        self.can_project(ProjectPermission::DeleteProject)
    }

    pub fn can_read_flags(&self, scope_id: ScopeId) -> bool {
        self.can_scope(scope_id, ScopePermission::ReadFeatureFlags)
    }

    pub fn can_toggle_flag(&self, scope_id: ScopeId) -> bool {
        self.can_scope(scope_id, ScopePermission::UpdateFeatureFlags)
    }
}

// ============================================================================
// PERMISSION SET (editor model)
// ============================================================================

/// Editable permission selection backing the invite and edit forms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    pub project_permissions: Vec<ProjectPermission>,
    pub scope_permissions: ScopePermissionMap,
}

impl PermissionSet {
    pub fn new(
        project_permissions: Vec<ProjectPermission>,
        scope_permissions: ScopePermissionMap,
    ) -> Self {
        Self {
            project_permissions,
            scope_permissions,
        }
    }

    pub fn toggle_project(&mut self, permission: ProjectPermission) {
        if let Some(pos) = self.project_permissions.iter().position(|p| *p == permission) {
            self.project_permissions.remove(pos);
        } else {
            self.project_permissions.push(permission);
        }
    }

    /// Toggle one scope permission. A scope left with nothing is dropped.
    pub fn toggle_scope(&mut self, scope_id: ScopeId, permission: ScopePermission) {
        let granted = self.scope_permissions.entry(scope_id).or_default();
        if let Some(pos) = granted.iter().position(|p| *p == permission) {
            granted.remove(pos);
        } else {
            granted.push(permission);
        }
        if granted.is_empty() {
            self.scope_permissions.remove(&scope_id);
        }
    }

    pub fn has_project(&self, permission: ProjectPermission) -> bool {
        self.project_permissions.contains(&permission)
    }

    pub fn has_scope(&self, scope_id: ScopeId, permission: ScopePermission) -> bool {
        self.scope_permissions
            .get(&scope_id)
            .is_some_and(|granted| granted.contains(&permission))
    }

    /// Number of granted permissions across both groups.
    pub fn total(&self) -> usize {
        self.project_permissions.len()
            + self
                .scope_permissions
                .values()
                .map(Vec::len)
                .sum::<usize>()
    }

    /// Copy the first scope's grants onto every scope in `scopes`.
    ///
    /// When the first scope has nothing granted, every scope permission is
    /// granted instead. An empty `scopes` leaves the set unchanged.
    pub fn apply_to_all_scopes(&mut self, scopes: &[ScopeId]) {
        let Some(first) = scopes.first() else {
            return;
        };
        let template = match self.scope_permissions.get(first) {
            Some(granted) if !granted.is_empty() => granted.clone(),
            _ => ScopePermission::all().to_vec(),
        };
        for scope_id in scopes {
            self.scope_permissions.insert(*scope_id, template.clone());
        }
    }

    pub fn into_parts(self) -> (Vec<ProjectPermission>, ScopePermissionMap) {
        (self.project_permissions, self.scope_permissions)
    }
}

impl From<&MyPermissions> for PermissionSet {
    fn from(perms: &MyPermissions) -> Self {
        Self::new(
            perms.project_permissions.clone(),
            perms.scope_permissions.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityIdType, ProjectId, UserId};

    fn user(role: GlobalRole) -> User {
        User {
            user_id: UserId::now_v7(),
            username: "jane".to_string(),
            full_name: "Jane".to_string(),
            global_role: role,
            must_change_password: false,
        }
    }

    fn perms(project: Vec<ProjectPermission>, scopes: ScopePermissionMap) -> MyPermissions {
        MyPermissions {
            user_id: UserId::now_v7(),
            project_id: ProjectId::now_v7(),
            project_permissions: project,
            scope_permissions: scopes,
        }
    }

    #[test]
    fn test_admin_without_scope_grant_cannot_toggle() {
        let admin = user(GlobalRole::Admin);
        let scope = ScopeId::now_v7();
        let p = perms(Vec::new(), ScopePermissionMap::new());

        assert!(is_admin(Some(&admin)));
        assert!(can_perform_project_action(
            Some(&admin),
            Some(&p),
            ProjectPermission::DeleteProject
        ));
        assert!(!can_perform_scope_action(
            Some(&p),
            scope,
            ScopePermission::UpdateFeatureFlags
        ));
    }

    #[test]
    fn test_null_permissions_fail_closed() {
        let plain = user(GlobalRole::User);
        let scope = ScopeId::now_v7();
        for permission in ProjectPermission::all() {
            assert!(!can_perform_project_action(Some(&plain), None, permission));
            assert!(!can_perform_project_action(None, None, permission));
        }
        for permission in ScopePermission::all() {
            assert!(!can_perform_scope_action(None, scope, permission));
        }
        assert!(!is_admin(None));
    }

    #[test]
    fn test_scope_grants_are_per_scope() {
        let prod = ScopeId::now_v7();
        let dev = ScopeId::now_v7();
        let mut scopes = ScopePermissionMap::new();
        scopes.insert(dev, vec![ScopePermission::ReadFeatureFlags]);
        let p = perms(vec![ProjectPermission::ManageScopes], scopes);

        assert!(has_scope_permission(Some(&p), dev, ScopePermission::ReadFeatureFlags));
        assert!(!has_scope_permission(Some(&p), dev, ScopePermission::UpdateFeatureFlags));
        assert!(!has_scope_permission(Some(&p), prod, ScopePermission::ReadFeatureFlags));
        assert!(has_project_permission(Some(&p), ProjectPermission::ManageScopes));
        assert!(!has_project_permission(Some(&p), ProjectPermission::ManageUsers));
    }

    #[test]
    fn test_context_named_gates() {
        let scope = ScopeId::now_v7();
        let mut scopes = ScopePermissionMap::new();
        scopes.insert(scope, vec![ScopePermission::UpdateFeatureFlags]);
        let ctx = PermissionContext::new(
            Some(user(GlobalRole::User)),
            Some(perms(vec![ProjectPermission::ViewApiKey], scopes)),
        );

        assert!(ctx.can_view_api_key());
        assert!(!ctx.can_regenerate_api_key());
        assert!(!ctx.can_manage_users());
        assert!(ctx.can_toggle_flag(scope));
        assert!(!ctx.can_read_flags(scope));

        let empty = PermissionContext::default();
        assert!(!empty.can_delete_project());
        assert!(!empty.can_toggle_flag(scope));
    }

    #[test]
    fn test_toggle_scope_drops_empty_entries() {
        let scope = ScopeId::now_v7();
        let mut set = PermissionSet::default();
        set.toggle_scope(scope, ScopePermission::ReadFeatureFlags);
        assert!(set.has_scope(scope, ScopePermission::ReadFeatureFlags));
        set.toggle_scope(scope, ScopePermission::ReadFeatureFlags);
        assert!(set.scope_permissions.is_empty());
        assert_eq!(set.total(), 0);
    }

    #[test]
    fn test_apply_to_all_scopes_copies_first() {
        let a = ScopeId::now_v7();
        let b = ScopeId::now_v7();
        let c = ScopeId::now_v7();
        let mut set = PermissionSet::default();
        set.toggle_project(ProjectPermission::ManageUsers);
        set.toggle_scope(a, ScopePermission::ReadFeatureFlags);
        set.toggle_scope(c, ScopePermission::UpdateFeatureFlags);

        set.apply_to_all_scopes(&[a, b, c]);

        for scope in [a, b, c] {
            assert_eq!(
                set.scope_permissions.get(&scope),
                Some(&vec![ScopePermission::ReadFeatureFlags])
            );
        }
        assert_eq!(set.total(), 4);
    }

    #[test]
    fn test_apply_to_all_scopes_grants_everything_when_first_is_empty() {
        let a = ScopeId::now_v7();
        let b = ScopeId::now_v7();
        let mut set = PermissionSet::default();
        set.apply_to_all_scopes(&[a, b]);
        assert_eq!(set.total(), 4);

        let before = set.clone();
        set.apply_to_all_scopes(&[]);
        assert_eq!(set, before);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::{EntityIdType, ProjectId, UserId};
    use proptest::prelude::*;

    fn arb_project_permissions() -> impl Strategy<Value = Vec<ProjectPermission>> {
        proptest::sample::subsequence(ProjectPermission::all().to_vec(), 0..=7)
    }

    fn arb_scope_permissions() -> impl Strategy<Value = Vec<ScopePermission>> {
        proptest::sample::subsequence(ScopePermission::all().to_vec(), 0..=2)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Admins pass every project check whatever their grants are.
        #[test]
        fn prop_admin_bypasses_project_checks(
            granted in arb_project_permissions(),
            idx in 0usize..7,
            with_perms in any::<bool>(),
        ) {
            let admin = User {
                user_id: UserId::now_v7(),
                username: "root".to_string(),
                full_name: "Root".to_string(),
                global_role: GlobalRole::Admin,
                must_change_password: false,
            };
            let perms = MyPermissions {
                user_id: admin.user_id,
                project_id: ProjectId::now_v7(),
                project_permissions: granted,
                scope_permissions: ScopePermissionMap::new(),
            };
            let permission = ProjectPermission::all()[idx];
            let perms = with_perms.then_some(&perms);
            prop_assert!(can_perform_project_action(Some(&admin), perms, permission));
        }

        /// Scope checks are exactly membership, regardless of role.
        #[test]
        fn prop_scope_check_is_membership(
            granted in arb_scope_permissions(),
            idx in 0usize..2,
        ) {
            let scope = ScopeId::now_v7();
            let mut scopes = ScopePermissionMap::new();
            scopes.insert(scope, granted.clone());
            let perms = MyPermissions {
                user_id: UserId::now_v7(),
                project_id: ProjectId::now_v7(),
                project_permissions: ProjectPermission::all().to_vec(),
                scope_permissions: scopes,
            };
            let permission = ScopePermission::all()[idx];
            prop_assert_eq!(
                can_perform_scope_action(Some(&perms), scope, permission),
                granted.contains(&permission)
            );
            prop_assert!(!can_perform_scope_action(Some(&perms), ScopeId::now_v7(), permission));
        }
    }
}
