//! Which cache entries each mutation patches, evicts and invalidates.

use flagdeck_client::cache::CacheKey;
use flagdeck_client::core::{
    CreateProjectRequest, CreateScopeRequest, CreateUserRequest, GlobalRole, InviteUserRequest,
    Project, ProjectDetail, ProjectPermission, Scope, ScopePermissionMap, UpdateProjectRequest,
    UpdateScopeRequest, UpdateUserPermissionsRequest, UpdateUserRequest, User,
};
use flagdeck_client::{AdminClient, ErrorKind, MutationState, NotificationLevel};
use flagdeck_test_utils::assertions::{assert_absent, assert_error_kind, assert_stale};
use flagdeck_test_utils::{fixtures, Endpoint};


fn cached<T: serde::de::DeserializeOwned>(client: &AdminClient, key: &CacheKey) -> T {
    client
        .cache()
        .get::<T>(key)
        .unwrap()
        .unwrap_or_else(|| panic!("{} not cached", key))
        .into_value()
}

#[tokio::test]
async fn delete_scope_evicts_detail_and_invalidates_lists() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();

    client.scope(seed.dev.id).await.unwrap();
    client.scopes(project_id).await.unwrap();
    client.feature_flags(project_id).await.unwrap();
    client.project(project_id).await.unwrap();

    let settled = client.delete_scope(seed.dev.id).await;
    assert_eq!(settled.state, MutationState::Invalidated);

    let cache = client.cache();
    assert_absent(cache, &CacheKey::Scope(seed.dev.id));
    assert_stale(cache, &CacheKey::Scopes(project_id));
    assert_stale(cache, &CacheKey::FeatureFlags(project_id));
    assert_stale(cache, &CacheKey::Project(project_id));

    // The refetched list no longer has the scope, and counts follow.
    let scopes = client.scopes(project_id).await.unwrap();
    assert_eq!(scopes, vec![seed.prod.clone()]);
    let detail = client.project(project_id).await.unwrap();
    assert_eq!(detail.scope_count, 1);
}

#[tokio::test]
async fn delete_scope_invalidates_flags_holding_its_values() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    client.scope(seed.dev.id).await.unwrap();
    client.feature_flag(seed.flag.id).await.unwrap();

    assert!(client.delete_scope(seed.dev.id).await.is_ok());
    assert_stale(client.cache(), &CacheKey::FeatureFlag(seed.flag.id));

    let flag = client.feature_flag(seed.flag.id).await.unwrap();
    assert!(flag.value_for(seed.dev.id).is_none());
    assert!(flag.value_for(seed.prod.id).is_some());
}

#[tokio::test]
async fn failed_delete_restores_the_detail() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let before = client.scope(seed.dev.id).await.unwrap();

    api.fail_next(Endpoint::DeleteScope, 403, Some("Missing ManageScopes permission"));
    let settled = client.delete_scope(seed.dev.id).await;

    assert_eq!(settled.state, MutationState::RolledBack);
    assert_error_kind(&settled.result, ErrorKind::Forbidden);
    let restored = client
        .cache()
        .get::<Scope>(&CacheKey::Scope(seed.dev.id))
        .unwrap()
        .unwrap();
    assert_eq!(restored.value(), &before);
    assert!(restored.is_stale());
    assert!(client.session().is_authenticated());
}

#[tokio::test]
async fn delete_project_evicts_every_project_key() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();

    client.projects().await.unwrap();
    client.project(project_id).await.unwrap();
    client.my_permissions(project_id).await.unwrap();
    client.scopes(project_id).await.unwrap();
    client.feature_flags(project_id).await.unwrap();
    client.project_users(project_id).await.unwrap();
    client.available_users(project_id).await.unwrap();

    let settled = client.delete_project(project_id).await;
    assert!(settled.is_ok());

    let cache = client.cache();
    for key in [
        CacheKey::Project(project_id),
        CacheKey::MyPermissions(project_id),
        CacheKey::Scopes(project_id),
        CacheKey::FeatureFlags(project_id),
        CacheKey::ProjectUsers(project_id),
        CacheKey::AvailableUsers(project_id),
    ] {
        assert_absent(cache, &key);
    }
    assert_stale(cache, &CacheKey::Projects);
    assert!(client.projects().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_project_evicts_cascaded_children() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();

    client.scope(seed.dev.id).await.unwrap();
    client.feature_flag(seed.flag.id).await.unwrap();
    let members = client.project_users(project_id).await.unwrap();
    let membership = CacheKey::ProjectUser(project_id, seed.member.user_id);
    client.cache().set(&membership, &members[0]).unwrap();

    assert!(client.delete_project(project_id).await.is_ok());

    let cache = client.cache();
    assert_absent(cache, &CacheKey::Scope(seed.dev.id));
    assert_absent(cache, &CacheKey::FeatureFlag(seed.flag.id));
    assert_absent(cache, &membership);
    assert_error_kind(&client.scope(seed.dev.id).await, ErrorKind::NotFound);
    assert_error_kind(&client.feature_flag(seed.flag.id).await, ErrorKind::NotFound);
}

#[tokio::test]
async fn archive_flips_the_flag_and_keeps_the_project_listed() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.projects().await.unwrap();
    client.project(project_id).await.unwrap();

    let settled = client.archive_project(project_id).await;
    assert_eq!(settled.state, MutationState::Invalidated);

    let detail: ProjectDetail = cached(&client, &CacheKey::Project(project_id));
    assert!(detail.project.is_archived);
    assert!(detail.project.updated_at >= seed.project.project.updated_at);
    let projects: Vec<Project> = cached(&client, &CacheKey::Projects);
    assert_eq!(projects.len(), 1);
    assert!(projects[0].is_archived);
    assert_stale(client.cache(), &CacheKey::Project(project_id));
    assert_stale(client.cache(), &CacheKey::Projects);
    assert!(api.stored_project(project_id).unwrap().project.is_archived);

    assert!(client.unarchive_project(project_id).await.is_ok());
    let detail: ProjectDetail = cached(&client, &CacheKey::Project(project_id));
    assert!(!detail.project.is_archived);
    assert_eq!(
        client.drain_notifications().last().map(|n| n.message.clone()),
        Some("Project unarchived successfully".to_string())
    );
}

#[tokio::test]
async fn failed_archive_restores_both_copies() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.projects().await.unwrap();
    client.project(project_id).await.unwrap();
    let detail_before = client.cache().get_raw(&CacheKey::Project(project_id)).unwrap();
    let list_before = client.cache().get_raw(&CacheKey::Projects).unwrap();

    api.fail_next(Endpoint::ArchiveProject, 500, None);
    let settled = client.archive_project(project_id).await;

    assert_eq!(settled.state, MutationState::RolledBack);
    assert_eq!(client.cache().get_raw(&CacheKey::Project(project_id)).unwrap(), detail_before);
    assert_eq!(client.cache().get_raw(&CacheKey::Projects).unwrap(), list_before);
    assert!(!api.stored_project(project_id).unwrap().project.is_archived);
}

#[tokio::test]
async fn regenerated_key_is_written_into_the_detail() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.project(project_id).await.unwrap();

    let response = client
        .regenerate_api_key(project_id)
        .await
        .into_result()
        .unwrap();
    assert_ne!(Some(&response.api_key), seed.project.api_key.as_ref());

    let detail: ProjectDetail = cached(&client, &CacheKey::Project(project_id));
    assert_eq!(detail.api_key.as_ref(), Some(&response.api_key));
    assert_eq!(detail.project.updated_at, response.regenerated_at);
    assert_stale(client.cache(), &CacheKey::Project(project_id));
    assert_eq!(
        client.drain_notifications()[0].message,
        "API key regenerated successfully"
    );
}

#[tokio::test]
async fn update_project_patches_detail_and_list() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.projects().await.unwrap();
    client.project(project_id).await.unwrap();

    let req = UpdateProjectRequest {
        name: "Web Shop EU".to_string(),
        description: Some("European storefront".to_string()),
    };
    let settled = client.update_project(project_id, &req).await;
    assert_eq!(settled.value().map(|p| p.project.name.as_str()), Some("Web Shop EU"));

    let detail = client
        .cache()
        .get::<ProjectDetail>(&CacheKey::Project(project_id))
        .unwrap()
        .unwrap();
    assert_eq!(detail.value().project.name, "Web Shop EU");
    assert_eq!(detail.value().api_key, seed.project.api_key);
    assert_stale(client.cache(), &CacheKey::Projects);
}

#[tokio::test]
async fn create_project_conflict_keeps_list_and_reports_message() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    client.projects().await.unwrap();

    let req = CreateProjectRequest {
        name: "Another shop".to_string(),
        alias: seed.project.project.alias.clone(),
        description: None,
    };
    let settled = client.create_project(&req).await;
    assert_error_kind(&settled.result, ErrorKind::Conflict);
    assert_eq!(
        settled.error().unwrap().user_message(),
        "A project with alias 'web-shop' already exists"
    );
    assert_stale(client.cache(), &CacheKey::Projects);

    let notifications = client.drain_notifications();
    assert_eq!(
        notifications[0].message,
        "Failed to create project. A project with alias 'web-shop' already exists"
    );
}

#[tokio::test]
async fn invalid_request_never_reaches_the_server() {
    let (api, _) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;

    let req = CreateProjectRequest {
        name: "ab".to_string(),
        alias: "has space".to_string(),
        description: None,
    };
    let settled = client.create_project(&req).await;
    assert_eq!(settled.state, MutationState::Idle);
    let err = settled.error().unwrap();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.field_error().map(|f| f.field.as_str()), Some("name"));
    assert_eq!(api.call_count(Endpoint::CreateProject), 0);
    assert!(client.drain_notifications().is_empty());
}

#[tokio::test]
async fn create_scope_adds_values_to_existing_flags() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.feature_flags(project_id).await.unwrap();
    client.scopes(project_id).await.unwrap();

    let req = CreateScopeRequest {
        name: "Staging".to_string(),
        alias: None,
        description: None,
    };
    let scope = client.create_scope(project_id, &req).await.into_result().unwrap();
    assert_eq!(scope.alias, "staging");
    assert_stale(client.cache(), &CacheKey::Scopes(project_id));

    let flag = api.stored_feature_flag(seed.flag.id).unwrap();
    assert_eq!(flag.values.len(), 3);
    assert_eq!(flag.value_for(scope.id).map(|v| v.is_enabled), Some(false));
}

#[tokio::test]
async fn rename_scope_patches_the_list_entry() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.scopes(project_id).await.unwrap();

    let req = UpdateScopeRequest {
        name: "Live".to_string(),
        description: None,
    };
    assert!(client.update_scope(seed.prod.id, &req).await.is_ok());

    let scopes = client
        .cache()
        .get::<Vec<Scope>>(&CacheKey::Scopes(project_id))
        .unwrap()
        .unwrap()
        .into_value();
    let prod = scopes.iter().find(|s| s.id == seed.prod.id).unwrap();
    assert_eq!(prod.name, "Live");
    assert_eq!(prod.alias, "prod");
}

#[tokio::test]
async fn create_user_conflict_is_a_username_field_error() {
    let (api, _) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;

    let req = CreateUserRequest {
        username: fixtures::MEMBER_USERNAME.to_string(),
        full_name: "Someone Else".to_string(),
        temporary_password: "temporary-pass".to_string(),
        global_role: GlobalRole::User,
    };
    let settled = client.create_user(&req).await;
    let err = settled.error().unwrap();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let field = err.field_error().unwrap();
    assert_eq!(field.field, "username");
    assert_eq!(field.message, "This username is already taken");
}

#[tokio::test]
async fn invite_requires_a_permission_and_refreshes_membership() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();

    let empty = InviteUserRequest::new(seed.admin.user_id, Vec::new(), ScopePermissionMap::new());
    let rejected = client.invite_user(project_id, &empty).await;
    assert_error_kind(&rejected.result, ErrorKind::Validation);
    assert_eq!(api.call_count(Endpoint::InviteUser), 0);

    client.project_users(project_id).await.unwrap();
    let req = InviteUserRequest::new(
        seed.admin.user_id,
        vec![ProjectPermission::ViewApiKey],
        ScopePermissionMap::new(),
    );
    let member = client.invite_user(project_id, &req).await.into_result().unwrap();
    assert_eq!(member.user_id, seed.admin.user_id);
    assert_stale(client.cache(), &CacheKey::ProjectUsers(project_id));

    let available = client.available_users(project_id).await.unwrap();
    assert!(available.iter().all(|u| u.is_already_member));
    assert_eq!(client.project(project_id).await.unwrap().member_count, 2);
}

#[tokio::test]
async fn permission_update_replaces_both_groups() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.project_users(project_id).await.unwrap();

    let req = UpdateUserPermissionsRequest {
        project_permissions: vec![ProjectPermission::ViewApiKey],
        scope_permissions: ScopePermissionMap::new(),
    };
    let updated = client
        .update_user_permissions(project_id, seed.member.user_id, &req)
        .await
        .into_result()
        .unwrap();
    assert_eq!(updated.project_permissions, vec![ProjectPermission::ViewApiKey]);
    assert!(updated.scope_permissions.is_empty());

    let notifications = client.drain_notifications();
    assert_eq!(notifications[0].level, NotificationLevel::Success);
    assert_eq!(notifications[0].message, "Permissions updated successfully");
}

#[tokio::test]
async fn own_permission_change_invalidates_my_permissions() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::member_client(&api).await;
    let project_id = seed.project.id();
    client.my_permissions(project_id).await.unwrap();

    let req = UpdateUserPermissionsRequest {
        project_permissions: Vec::new(),
        scope_permissions: ScopePermissionMap::new(),
    };
    assert!(client
        .update_user_permissions(project_id, seed.member.user_id, &req)
        .await
        .is_ok());
    assert_stale(client.cache(), &CacheKey::MyPermissions(project_id));

    let context = client.permission_context(project_id).await.unwrap();
    assert!(!context.can_manage_flags());
    assert!(!context.can_read_flags(seed.dev.id));
}

#[tokio::test]
async fn permission_context_fails_closed_on_forbidden() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::member_client(&api).await;
    let project_id = seed.project.id();

    let context = client.permission_context(project_id).await.unwrap();
    assert!(context.can_toggle_flag(seed.dev.id));
    assert!(!context.can_toggle_flag(seed.prod.id));
    assert!(context.can_read_flags(seed.prod.id));

    client.cache().invalidate(&CacheKey::MyPermissions(project_id)).unwrap();
    api.fail_next(Endpoint::MyPermissions, 403, None);
    let context = client.permission_context(project_id).await.unwrap();
    assert!(!context.is_admin());
    assert!(!context.can_toggle_flag(seed.dev.id));
    assert!(!context.can_manage_flags());
}

#[tokio::test]
async fn delete_feature_flag_evicts_detail_and_refreshes_counts() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.feature_flag(seed.flag.id).await.unwrap();
    client.feature_flags(project_id).await.unwrap();
    client.project(project_id).await.unwrap();

    let settled = client.delete_feature_flag(seed.flag.id).await;
    assert_eq!(settled.state, MutationState::Invalidated);

    assert_absent(client.cache(), &CacheKey::FeatureFlag(seed.flag.id));
    assert_stale(client.cache(), &CacheKey::FeatureFlags(project_id));
    assert_stale(client.cache(), &CacheKey::Project(project_id));
    assert!(client.feature_flags(project_id).await.unwrap().is_empty());
    assert_eq!(client.project(project_id).await.unwrap().feature_flag_count, 0);
}

#[tokio::test]
async fn delete_uncached_feature_flag_still_refreshes_counts() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.project(project_id).await.unwrap();

    assert!(client.delete_feature_flag(seed.flag.id).await.is_ok());
    assert_stale(client.cache(), &CacheKey::Project(project_id));
    assert_eq!(client.project(project_id).await.unwrap().feature_flag_count, 0);
}

#[tokio::test]
async fn remove_project_user_evicts_the_membership() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    let members = client.project_users(project_id).await.unwrap();
    client.project(project_id).await.unwrap();
    let membership = CacheKey::ProjectUser(project_id, seed.member.user_id);
    client.cache().set(&membership, &members[0]).unwrap();

    let settled = client
        .remove_project_user(project_id, seed.member.user_id)
        .await;
    assert_eq!(settled.state, MutationState::Invalidated);

    assert_absent(client.cache(), &membership);
    assert_stale(client.cache(), &CacheKey::ProjectUsers(project_id));
    assert_stale(client.cache(), &CacheKey::Project(project_id));
    assert!(client.project_users(project_id).await.unwrap().is_empty());
    assert_eq!(client.project(project_id).await.unwrap().member_count, 0);
}

#[tokio::test]
async fn update_user_patches_detail_and_list() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    client.users().await.unwrap();
    let detail = CacheKey::User(seed.member.user_id);
    client.cache().set(&detail, &seed.member).unwrap();

    let req = UpdateUserRequest {
        full_name: "Morgan Member".to_string(),
        global_role: GlobalRole::Admin,
    };
    let settled = client.update_user(seed.member.user_id, &req).await;
    assert!(settled.is_ok());

    let user: User = cached(&client, &detail);
    assert_eq!(user.full_name, "Morgan Member");
    assert_eq!(user.global_role, GlobalRole::Admin);
    assert_eq!(user.username, seed.member.username);
    let users: Vec<User> = cached(&client, &CacheKey::Users);
    let listed = users.iter().find(|u| u.user_id == seed.member.user_id).unwrap();
    assert_eq!(listed.full_name, "Morgan Member");
    let admin = users.iter().find(|u| u.user_id == seed.admin.user_id).unwrap();
    assert_eq!(admin, &seed.admin);
}

#[tokio::test]
async fn delete_user_evicts_memberships_and_refreshes_member_counts() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.users().await.unwrap();
    client.project(project_id).await.unwrap();
    client.project_users(project_id).await.unwrap();
    let detail = CacheKey::User(seed.member.user_id);
    client.cache().set(&detail, &seed.member).unwrap();

    let settled = client.delete_user(seed.member.user_id).await;
    assert_eq!(settled.state, MutationState::Invalidated);

    let cache = client.cache();
    assert_absent(cache, &detail);
    assert_stale(cache, &CacheKey::Users);
    assert_stale(cache, &CacheKey::ProjectUsers(project_id));
    assert_stale(cache, &CacheKey::Project(project_id));
    assert_eq!(client.project(project_id).await.unwrap().member_count, 0);
    assert!(client
        .users()
        .await
        .unwrap()
        .iter()
        .all(|u| u.user_id != seed.member.user_id));
}
