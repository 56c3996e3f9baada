//! FLAGDECK Test Utilities
//!
//! Shared test infrastructure for the flagdeck workspace:
//! - Proptest generators for every entity type
//! - Fixtures for common scenarios
//! - [`MockApi`]: an in-memory fake of the REST server with failure
//!   injection and call gating

pub use flagdeck_core::{
    AvailableUser, EntityIdType, FeatureFlag, FeatureFlagId, FeatureFlagValue, FeatureFlagValueId,
    GlobalRole, MyPermissions, Project, ProjectDetail, ProjectId, ProjectPermission, ProjectUser,
    ProjectUserId, Scope, ScopeId, ScopePermission, ScopePermissionMap, Timestamp, User, UserId,
};

use async_trait::async_trait;
use chrono::Utc;
use flagdeck_client::{ApiClientError, ApiResult, FlagApi};
use flagdeck_core::{
    ChangePasswordRequest, CreateFeatureFlagRequest, CreateProjectRequest, CreateScopeRequest,
    CreateUserRequest, InviteUserRequest, LoginRequest, ProblemDetails, RegenerateApiKeyResponse,
    UpdateFeatureFlagRequest, UpdateFeatureFlagValueRequest, UpdateProjectRequest,
    UpdateScopeRequest, UpdateUserPermissionsRequest, UpdateUserRequest,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

// ============================================================================
// MOCK API
// ============================================================================

/// One server endpoint, for failure injection, gating and call counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Login,
    Logout,
    Me,
    ChangePassword,
    ListProjects,
    GetProject,
    CreateProject,
    UpdateProject,
    DeleteProject,
    ArchiveProject,
    UnarchiveProject,
    RegenerateApiKey,
    MyPermissions,
    ListScopes,
    CreateScope,
    GetScope,
    UpdateScope,
    DeleteScope,
    ListFeatureFlags,
    CreateFeatureFlag,
    GetFeatureFlag,
    UpdateFeatureFlag,
    DeleteFeatureFlag,
    UpdateFeatureFlagValue,
    ListProjectUsers,
    AvailableUsers,
    InviteUser,
    RemoveProjectUser,
    UpdateUserPermissions,
    ListUsers,
    CreateUser,
    UpdateUser,
    DeleteUser,
}

/// Holds a gated call open until the test releases it.
#[derive(Debug)]
pub struct Gate {
    entered: Notify,
    release: Semaphore,
}

impl Gate {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    /// Resolves once a call has reached the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let one waiting call through.
    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

#[derive(Debug, Clone)]
struct Failure {
    status: u16,
    problem: Option<ProblemDetails>,
}

#[derive(Debug, Default)]
struct MockState {
    projects: BTreeMap<ProjectId, ProjectDetail>,
    scopes: BTreeMap<ScopeId, Scope>,
    flags: BTreeMap<FeatureFlagId, FeatureFlag>,
    members: BTreeMap<(ProjectId, UserId), ProjectUser>,
    users: BTreeMap<UserId, User>,
    passwords: HashMap<String, String>,
    signed_in: Option<UserId>,
}

impl MockState {
    /// Recompute the detail counts of `project_id` from the stored rows.
    fn recount(&mut self, project_id: ProjectId) {
        let scopes = self.scopes.values().filter(|s| s.project_id == project_id).count();
        let flags = self.flags.values().filter(|f| f.project_id == project_id).count();
        let members = self.members.keys().filter(|(pid, _)| *pid == project_id).count();
        if let Some(detail) = self.projects.get_mut(&project_id) {
            detail.scope_count = scopes as u32;
            detail.feature_flag_count = flags as u32;
            detail.member_count = members as u32;
        }
    }

    fn current_user(&self) -> ApiResult<&User> {
        self.signed_in
            .and_then(|id| self.users.get(&id))
            .ok_or_else(|| ApiClientError::status(401, "Not authenticated"))
    }

    fn project(&self, id: ProjectId) -> ApiResult<&ProjectDetail> {
        self.projects
            .get(&id)
            .ok_or_else(|| ApiClientError::status(404, "Project not found"))
    }
}

/// In-memory stand-in for the flagdeck server.
///
/// Every call except `login` requires a signed-in user and answers 401
/// otherwise. Failures queued with [`MockApi::fail_next`] are returned
/// before the state is touched. A gated endpoint parks each call until
/// [`Gate::release`].
#[derive(Debug, Default)]
pub struct MockApi {
    state: Mutex<MockState>,
    failures: Mutex<HashMap<Endpoint, VecDeque<Failure>>>,
    gates: Mutex<HashMap<Endpoint, Arc<Gate>>>,
    calls: Mutex<Vec<Endpoint>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn slug(name: &str) -> String {
    name.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    // === Seeding ===

    pub fn add_user(&self, user: User, password: &str) {
        let mut state = lock(&self.state);
        state.passwords.insert(user.username.clone(), password.to_string());
        state.users.insert(user.user_id, user);
    }

    pub fn add_project(&self, detail: ProjectDetail) {
        let mut state = lock(&self.state);
        let id = detail.id();
        state.projects.insert(id, detail);
        state.recount(id);
    }

    pub fn add_scope(&self, scope: Scope) {
        let mut state = lock(&self.state);
        let project_id = scope.project_id;
        state.scopes.insert(scope.id, scope);
        state.recount(project_id);
    }

    pub fn add_feature_flag(&self, flag: FeatureFlag) {
        let mut state = lock(&self.state);
        let project_id = flag.project_id;
        state.flags.insert(flag.id, flag);
        state.recount(project_id);
    }

    pub fn add_member(&self, project_id: ProjectId, member: ProjectUser) {
        let mut state = lock(&self.state);
        state.members.insert((project_id, member.user_id), member);
        state.recount(project_id);
    }

    /// Drop the server-side session; the next call answers 401.
    pub fn expire_session(&self) {
        lock(&self.state).signed_in = None;
    }

    // === Inspection ===

    pub fn stored_feature_flag(&self, id: FeatureFlagId) -> Option<FeatureFlag> {
        lock(&self.state).flags.get(&id).cloned()
    }

    pub fn stored_project(&self, id: ProjectId) -> Option<ProjectDetail> {
        lock(&self.state).projects.get(&id).cloned()
    }

    pub fn stored_scope(&self, id: ScopeId) -> Option<Scope> {
        lock(&self.state).scopes.get(&id).cloned()
    }

    pub fn call_count(&self, endpoint: Endpoint) -> usize {
        lock(&self.calls).iter().filter(|e| **e == endpoint).count()
    }

    pub fn calls(&self) -> Vec<Endpoint> {
        lock(&self.calls).clone()
    }

    // === Behaviour control ===

    /// Answer the next call to `endpoint` with `status`.
    pub fn fail_next(&self, endpoint: Endpoint, status: u16, detail: Option<&str>) {
        let problem = detail.map(|detail| ProblemDetails {
            status: Some(status),
            detail: Some(detail.to_string()),
            ..Default::default()
        });
        lock(&self.failures)
            .entry(endpoint)
            .or_default()
            .push_back(Failure { status, problem });
    }

    /// Park every call to `endpoint` until the returned gate releases it.
    pub fn gate(&self, endpoint: Endpoint) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        lock(&self.gates).insert(endpoint, Arc::clone(&gate));
        gate
    }

    pub fn ungate(&self, endpoint: Endpoint) {
        lock(&self.gates).remove(&endpoint);
    }

    /// Common prologue of every endpoint.
    async fn enter(&self, endpoint: Endpoint) -> ApiResult<()> {
        lock(&self.calls).push(endpoint);

        let gate = lock(&self.gates).get(&endpoint).cloned();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            if let Ok(permit) = gate.release.acquire().await {
                permit.forget();
            }
        }

        let failure = lock(&self.failures)
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(Failure { status, problem }) => Err(ApiClientError::Status { status, problem }),
            None => Ok(()),
        }
    }

    /// Prologue for endpoints behind the session cookie.
    async fn enter_authed(&self, endpoint: Endpoint) -> ApiResult<MutexGuard<'_, MockState>> {
        self.enter(endpoint).await?;
        let state = lock(&self.state);
        state.current_user()?;
        Ok(state)
    }
}

#[async_trait]
impl FlagApi for MockApi {
    async fn login(&self, req: &LoginRequest) -> ApiResult<User> {
        self.enter(Endpoint::Login).await?;
        let mut state = lock(&self.state);
        let valid = state.passwords.get(&req.username) == Some(&req.password);
        let user = state
            .users
            .values()
            .find(|u| u.username == req.username)
            .filter(|_| valid)
            .cloned()
            .ok_or_else(|| ApiClientError::status(401, "Invalid username or password"))?;
        state.signed_in = Some(user.user_id);
        Ok(user)
    }

    async fn logout(&self) -> ApiResult<()> {
        self.enter(Endpoint::Logout).await?;
        lock(&self.state).signed_in = None;
        Ok(())
    }

    async fn me(&self) -> ApiResult<User> {
        let state = self.enter_authed(Endpoint::Me).await?;
        state.current_user().cloned()
    }

    async fn change_password(&self, req: &ChangePasswordRequest) -> ApiResult<()> {
        let mut state = self.enter_authed(Endpoint::ChangePassword).await?;
        let user = state.current_user()?.clone();
        if state.passwords.get(&user.username) != Some(&req.current_password) {
            return Err(ApiClientError::status(400, "Current password is incorrect"));
        }
        state.passwords.insert(user.username.clone(), req.new_password.clone());
        if let Some(stored) = state.users.get_mut(&user.user_id) {
            stored.must_change_password = false;
        }
        Ok(())
    }

    // === Projects ===

    async fn list_projects(&self) -> ApiResult<Vec<Project>> {
        let state = self.enter_authed(Endpoint::ListProjects).await?;
        Ok(state.projects.values().map(|d| d.project.clone()).collect())
    }

    async fn get_project(&self, id: ProjectId) -> ApiResult<ProjectDetail> {
        let state = self.enter_authed(Endpoint::GetProject).await?;
        state.project(id).cloned()
    }

    async fn create_project(&self, req: &CreateProjectRequest) -> ApiResult<ProjectDetail> {
        let mut state = self.enter_authed(Endpoint::CreateProject).await?;
        if state.projects.values().any(|p| p.project.alias == req.alias) {
            return Err(ApiClientError::status(
                409,
                format!("A project with alias '{}' already exists", req.alias),
            ));
        }
        let creator = state.current_user()?.username.clone();
        let mut detail = fixtures::project(&req.name, &req.alias);
        detail.project.description = req.description.clone();
        detail.project.created_by = creator;
        let id = detail.id();
        state.projects.insert(id, detail);
        state.recount(id);
        state.project(id).cloned()
    }

    async fn update_project(&self, id: ProjectId, req: &UpdateProjectRequest) -> ApiResult<ProjectDetail> {
        let mut state = self.enter_authed(Endpoint::UpdateProject).await?;
        state.project(id)?;
        if let Some(detail) = state.projects.get_mut(&id) {
            detail.project.name = req.name.clone();
            detail.project.description = req.description.clone();
            detail.project.updated_at = Utc::now();
        }
        state.project(id).cloned()
    }

    async fn delete_project(&self, id: ProjectId) -> ApiResult<()> {
        let mut state = self.enter_authed(Endpoint::DeleteProject).await?;
        state.project(id)?;
        state.projects.remove(&id);
        state.scopes.retain(|_, s| s.project_id != id);
        state.flags.retain(|_, f| f.project_id != id);
        state.members.retain(|(pid, _), _| *pid != id);
        Ok(())
    }

    async fn archive_project(&self, id: ProjectId) -> ApiResult<()> {
        let mut state = self.enter_authed(Endpoint::ArchiveProject).await?;
        state.project(id)?;
        if let Some(detail) = state.projects.get_mut(&id) {
            detail.project.is_archived = true;
        }
        Ok(())
    }

    async fn unarchive_project(&self, id: ProjectId) -> ApiResult<()> {
        let mut state = self.enter_authed(Endpoint::UnarchiveProject).await?;
        state.project(id)?;
        if let Some(detail) = state.projects.get_mut(&id) {
            detail.project.is_archived = false;
        }
        Ok(())
    }

    async fn regenerate_api_key(&self, id: ProjectId) -> ApiResult<RegenerateApiKeyResponse> {
        let mut state = self.enter_authed(Endpoint::RegenerateApiKey).await?;
        state.project(id)?;
        let response = RegenerateApiKeyResponse {
            api_key: format!("fd_{}", Uuid::new_v4().simple()),
            regenerated_at: Utc::now(),
        };
        if let Some(detail) = state.projects.get_mut(&id) {
            detail.api_key = Some(response.api_key.clone());
            detail.project.updated_at = response.regenerated_at;
        }
        Ok(response)
    }

    async fn my_permissions(&self, id: ProjectId) -> ApiResult<MyPermissions> {
        let state = self.enter_authed(Endpoint::MyPermissions).await?;
        state.project(id)?;
        let user_id = state.current_user()?.user_id;
        let member = state.members.get(&(id, user_id));
        Ok(MyPermissions {
            user_id,
            project_id: id,
            project_permissions: member
                .map(|m| m.project_permissions.clone())
                .unwrap_or_default(),
            scope_permissions: member
                .map(|m| m.scope_permissions.clone())
                .unwrap_or_default(),
        })
    }

    // === Scopes ===

    async fn list_scopes(&self, project_id: ProjectId) -> ApiResult<Vec<Scope>> {
        let state = self.enter_authed(Endpoint::ListScopes).await?;
        state.project(project_id)?;
        Ok(state
            .scopes
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn create_scope(&self, project_id: ProjectId, req: &CreateScopeRequest) -> ApiResult<Scope> {
        let mut state = self.enter_authed(Endpoint::CreateScope).await?;
        state.project(project_id)?;
        let alias = req.alias.clone().unwrap_or_else(|| slug(&req.name));
        if state
            .scopes
            .values()
            .any(|s| s.project_id == project_id && s.alias == alias)
        {
            return Err(ApiClientError::status(
                409,
                format!("A scope with alias '{}' already exists", alias),
            ));
        }
        let mut scope = fixtures::scope(project_id, &req.name, &alias);
        scope.description = req.description.clone();
        for flag in state.flags.values_mut().filter(|f| f.project_id == project_id) {
            flag.values.push(fixtures::flag_value(&scope, false));
        }
        state.scopes.insert(scope.id, scope.clone());
        state.recount(project_id);
        Ok(scope)
    }

    async fn get_scope(&self, id: ScopeId) -> ApiResult<Scope> {
        let state = self.enter_authed(Endpoint::GetScope).await?;
        state
            .scopes
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiClientError::status(404, "Scope not found"))
    }

    async fn update_scope(&self, id: ScopeId, req: &UpdateScopeRequest) -> ApiResult<Scope> {
        let mut state = self.enter_authed(Endpoint::UpdateScope).await?;
        let scope = state
            .scopes
            .get_mut(&id)
            .ok_or_else(|| ApiClientError::status(404, "Scope not found"))?;
        scope.name = req.name.clone();
        scope.description = req.description.clone();
        let updated = scope.clone();
        for flag in state.flags.values_mut() {
            for value in flag.values.iter_mut().filter(|v| v.scope_id == id) {
                value.scope_name = updated.name.clone();
            }
        }
        Ok(updated)
    }

    async fn delete_scope(&self, id: ScopeId) -> ApiResult<()> {
        let mut state = self.enter_authed(Endpoint::DeleteScope).await?;
        let scope = state
            .scopes
            .remove(&id)
            .ok_or_else(|| ApiClientError::status(404, "Scope not found"))?;
        for flag in state.flags.values_mut() {
            flag.values.retain(|v| v.scope_id != id);
        }
        for member in state.members.values_mut() {
            member.scope_permissions.remove(&id);
        }
        state.recount(scope.project_id);
        Ok(())
    }

    // === Feature flags ===

    async fn list_feature_flags(&self, project_id: ProjectId) -> ApiResult<Vec<FeatureFlag>> {
        let state = self.enter_authed(Endpoint::ListFeatureFlags).await?;
        state.project(project_id)?;
        Ok(state
            .flags
            .values()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn create_feature_flag(
        &self,
        project_id: ProjectId,
        req: &CreateFeatureFlagRequest,
    ) -> ApiResult<FeatureFlag> {
        let mut state = self.enter_authed(Endpoint::CreateFeatureFlag).await?;
        state.project(project_id)?;
        let key = req.key.clone().unwrap_or_else(|| slug(&req.name));
        if state
            .flags
            .values()
            .any(|f| f.project_id == project_id && f.key == key)
        {
            return Err(ApiClientError::status(
                409,
                format!("A feature flag with key '{}' already exists", key),
            ));
        }
        let scopes: Vec<Scope> = state
            .scopes
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        let mut flag = fixtures::feature_flag(project_id, &req.name, &key, &scopes);
        flag.description = req.description.clone();
        state.flags.insert(flag.id, flag.clone());
        state.recount(project_id);
        Ok(flag)
    }

    async fn get_feature_flag(&self, id: FeatureFlagId) -> ApiResult<FeatureFlag> {
        let state = self.enter_authed(Endpoint::GetFeatureFlag).await?;
        state
            .flags
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiClientError::status(404, "Feature flag not found"))
    }

    async fn update_feature_flag(
        &self,
        id: FeatureFlagId,
        req: &UpdateFeatureFlagRequest,
    ) -> ApiResult<FeatureFlag> {
        let mut state = self.enter_authed(Endpoint::UpdateFeatureFlag).await?;
        let project_id = state
            .flags
            .get(&id)
            .map(|f| f.project_id)
            .ok_or_else(|| ApiClientError::status(404, "Feature flag not found"))?;
        if state
            .flags
            .values()
            .any(|f| f.id != id && f.project_id == project_id && f.key == req.key)
        {
            return Err(ApiClientError::status(
                409,
                format!("A feature flag with key '{}' already exists", req.key),
            ));
        }
        let flag = state
            .flags
            .get_mut(&id)
            .ok_or_else(|| ApiClientError::status(404, "Feature flag not found"))?;
        flag.name = req.name.clone();
        flag.key = req.key.clone();
        flag.description = req.description.clone();
        flag.updated_at = Utc::now();
        Ok(flag.clone())
    }

    async fn delete_feature_flag(&self, id: FeatureFlagId) -> ApiResult<()> {
        let mut state = self.enter_authed(Endpoint::DeleteFeatureFlag).await?;
        let flag = state
            .flags
            .remove(&id)
            .ok_or_else(|| ApiClientError::status(404, "Feature flag not found"))?;
        state.recount(flag.project_id);
        Ok(())
    }

    async fn update_feature_flag_value(
        &self,
        id: FeatureFlagId,
        req: &UpdateFeatureFlagValueRequest,
    ) -> ApiResult<FeatureFlagValue> {
        let mut state = self.enter_authed(Endpoint::UpdateFeatureFlagValue).await?;
        let flag = state
            .flags
            .get_mut(&id)
            .ok_or_else(|| ApiClientError::status(404, "Feature flag not found"))?;
        let value = flag
            .values
            .iter_mut()
            .find(|v| v.scope_id == req.scope_id)
            .ok_or_else(|| ApiClientError::status(404, "Scope not found for this flag"))?;
        value.is_enabled = req.is_enabled;
        value.updated_at = Utc::now();
        Ok(value.clone())
    }

    // === Project users ===

    async fn list_project_users(&self, project_id: ProjectId) -> ApiResult<Vec<ProjectUser>> {
        let state = self.enter_authed(Endpoint::ListProjectUsers).await?;
        state.project(project_id)?;
        Ok(state
            .members
            .iter()
            .filter(|((pid, _), _)| *pid == project_id)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn available_users(&self, project_id: ProjectId) -> ApiResult<Vec<AvailableUser>> {
        let state = self.enter_authed(Endpoint::AvailableUsers).await?;
        state.project(project_id)?;
        Ok(state
            .users
            .values()
            .map(|u| AvailableUser {
                user_id: u.user_id,
                username: u.username.clone(),
                full_name: u.full_name.clone(),
                is_already_member: state.members.contains_key(&(project_id, u.user_id)),
            })
            .collect())
    }

    async fn invite_user(&self, project_id: ProjectId, req: &InviteUserRequest) -> ApiResult<ProjectUser> {
        let mut state = self.enter_authed(Endpoint::InviteUser).await?;
        state.project(project_id)?;
        if state.members.contains_key(&(project_id, req.user_id)) {
            return Err(ApiClientError::status(409, "User is already a member of this project"));
        }
        let user = state
            .users
            .get(&req.user_id)
            .cloned()
            .ok_or_else(|| ApiClientError::status(404, "User not found"))?;
        let member = fixtures::project_user(
            &user,
            req.project_permissions.clone().unwrap_or_default(),
            req.scope_permissions.clone().unwrap_or_default(),
        );
        state.members.insert((project_id, user.user_id), member.clone());
        state.recount(project_id);
        Ok(member)
    }

    async fn remove_project_user(&self, project_id: ProjectId, user_id: UserId) -> ApiResult<()> {
        let mut state = self.enter_authed(Endpoint::RemoveProjectUser).await?;
        state
            .members
            .remove(&(project_id, user_id))
            .ok_or_else(|| ApiClientError::status(404, "User is not a member of this project"))?;
        state.recount(project_id);
        Ok(())
    }

    async fn update_user_permissions(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        req: &UpdateUserPermissionsRequest,
    ) -> ApiResult<ProjectUser> {
        let mut state = self.enter_authed(Endpoint::UpdateUserPermissions).await?;
        let member = state
            .members
            .get_mut(&(project_id, user_id))
            .ok_or_else(|| ApiClientError::status(404, "User is not a member of this project"))?;
        member.project_permissions = req.project_permissions.clone();
        member.scope_permissions = req.scope_permissions.clone();
        Ok(member.clone())
    }

    // === Global users ===

    async fn list_users(&self) -> ApiResult<Vec<User>> {
        let state = self.enter_authed(Endpoint::ListUsers).await?;
        Ok(state.users.values().cloned().collect())
    }

    async fn create_user(&self, req: &CreateUserRequest) -> ApiResult<User> {
        let mut state = self.enter_authed(Endpoint::CreateUser).await?;
        if state.users.values().any(|u| u.username == req.username) {
            return Err(ApiClientError::status(409, "Username already exists"));
        }
        let mut user = fixtures::user(&req.username, req.global_role);
        user.full_name = req.full_name.clone();
        user.must_change_password = true;
        state
            .passwords
            .insert(user.username.clone(), req.temporary_password.clone());
        state.users.insert(user.user_id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: UserId, req: &UpdateUserRequest) -> ApiResult<User> {
        let mut state = self.enter_authed(Endpoint::UpdateUser).await?;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| ApiClientError::status(404, "User not found"))?;
        user.full_name = req.full_name.clone();
        user.global_role = req.global_role;
        Ok(user.clone())
    }

    async fn delete_user(&self, id: UserId) -> ApiResult<()> {
        let mut state = self.enter_authed(Endpoint::DeleteUser).await?;
        let user = state
            .users
            .remove(&id)
            .ok_or_else(|| ApiClientError::status(404, "User not found"))?;
        state.passwords.remove(&user.username);
        let projects: Vec<ProjectId> = state
            .members
            .keys()
            .filter(|(_, uid)| *uid == id)
            .map(|(pid, _)| *pid)
            .collect();
        state.members.retain(|(_, uid), _| *uid != id);
        for project_id in projects {
            state.recount(project_id);
        }
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for flagdeck entity types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_project_id() -> impl Strategy<Value = ProjectId> {
        arb_uuid().prop_map(ProjectId::new)
    }

    pub fn arb_scope_id() -> impl Strategy<Value = ScopeId> {
        arb_uuid().prop_map(ScopeId::new)
    }

    pub fn arb_feature_flag_id() -> impl Strategy<Value = FeatureFlagId> {
        arb_uuid().prop_map(FeatureFlagId::new)
    }

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        arb_uuid().prop_map(UserId::new)
    }

    /// Timestamps between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_project_permission() -> impl Strategy<Value = ProjectPermission> {
        proptest::sample::select(ProjectPermission::all().to_vec())
    }

    pub fn arb_scope_permission() -> impl Strategy<Value = ScopePermission> {
        prop_oneof![
            Just(ScopePermission::ReadFeatureFlags),
            Just(ScopePermission::UpdateFeatureFlags),
        ]
    }

    pub fn arb_global_role() -> impl Strategy<Value = GlobalRole> {
        prop_oneof![Just(GlobalRole::User), Just(GlobalRole::Admin)]
    }

    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9 ]{2,30}"
    }

    pub fn arb_alias() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{2,20}"
    }

    pub fn arb_project_permissions() -> impl Strategy<Value = Vec<ProjectPermission>> {
        proptest::sample::subsequence(ProjectPermission::all().to_vec(), 0..=7)
    }

    pub fn arb_scope_permissions() -> impl Strategy<Value = Vec<ScopePermission>> {
        proptest::sample::subsequence(ScopePermission::all().to_vec(), 0..=2)
    }

    pub fn arb_scope_permission_map(scopes: Vec<ScopeId>) -> impl Strategy<Value = ScopePermissionMap> {
        let len = scopes.len();
        proptest::collection::vec(arb_scope_permissions(), len).prop_map(move |grants| {
            scopes
                .iter()
                .copied()
                .zip(grants)
                .filter(|(_, perms)| !perms.is_empty())
                .collect()
        })
    }

    pub fn arb_user() -> impl Strategy<Value = User> {
        (arb_user_id(), "[a-z][a-z0-9_-]{2,20}", arb_name(), arb_global_role(), any::<bool>()).prop_map(
            |(user_id, username, full_name, global_role, must_change_password)| User {
                user_id,
                username,
                full_name,
                global_role,
                must_change_password,
            },
        )
    }

    pub fn arb_scope(project_id: ProjectId) -> impl Strategy<Value = Scope> {
        (arb_scope_id(), arb_alias(), arb_name(), arb_timestamp()).prop_map(
            move |(id, alias, name, created_at)| Scope {
                id,
                project_id,
                alias,
                name,
                description: None,
                created_at,
            },
        )
    }

    /// A flag of `project_id` with one value per generated scope.
    pub fn arb_feature_flag(project_id: ProjectId) -> impl Strategy<Value = FeatureFlag> {
        (
            arb_feature_flag_id(),
            arb_alias(),
            arb_name(),
            arb_timestamp(),
            proptest::collection::vec((arb_scope(project_id), any::<bool>()), 1..6),
        )
            .prop_map(move |(id, key, name, at, scopes)| FeatureFlag {
                id,
                project_id,
                key,
                name,
                description: None,
                created_at: at,
                updated_at: at,
                values: scopes
                    .iter()
                    .map(|(scope, enabled)| fixtures::flag_value(scope, *enabled))
                    .collect(),
            })
    }

    pub fn arb_my_permissions(project_id: ProjectId, scopes: Vec<ScopeId>) -> impl Strategy<Value = MyPermissions> {
        (arb_user_id(), arb_project_permissions(), arb_scope_permission_map(scopes)).prop_map(
            move |(user_id, project_permissions, scope_permissions)| MyPermissions {
                user_id,
                project_id,
                project_permissions,
                scope_permissions,
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities and a seeded [`MockApi`].

    use super::*;

    pub const ADMIN_USERNAME: &str = "admin";
    pub const ADMIN_PASSWORD: &str = "correct-horse";
    pub const MEMBER_USERNAME: &str = "member";
    pub const MEMBER_PASSWORD: &str = "battery-staple";

    pub fn user(username: &str, global_role: GlobalRole) -> User {
        User {
            user_id: UserId::now_v7(),
            username: username.to_string(),
            full_name: format!("{} user", username),
            global_role,
            must_change_password: false,
        }
    }

    pub fn project(name: &str, alias: &str) -> ProjectDetail {
        let now = Utc::now();
        ProjectDetail {
            project: Project {
                id: ProjectId::now_v7(),
                alias: alias.to_string(),
                name: name.to_string(),
                description: None,
                created_by: ADMIN_USERNAME.to_string(),
                is_archived: false,
                created_at: now,
                updated_at: now,
            },
            api_key: Some(format!("fd_{}", Uuid::new_v4().simple())),
            member_count: 0,
            scope_count: 0,
            feature_flag_count: 0,
        }
    }

    pub fn scope(project_id: ProjectId, name: &str, alias: &str) -> Scope {
        Scope {
            id: ScopeId::now_v7(),
            project_id,
            alias: alias.to_string(),
            name: name.to_string(),
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn flag_value(scope: &Scope, is_enabled: bool) -> FeatureFlagValue {
        FeatureFlagValue {
            id: FeatureFlagValueId::now_v7(),
            scope_id: scope.id,
            scope_name: scope.name.clone(),
            scope_alias: scope.alias.clone(),
            is_enabled,
            updated_at: Utc::now(),
        }
    }

    /// A flag with a disabled value in every scope.
    pub fn feature_flag(project_id: ProjectId, name: &str, key: &str, scopes: &[Scope]) -> FeatureFlag {
        let now = Utc::now();
        FeatureFlag {
            id: FeatureFlagId::now_v7(),
            project_id,
            key: key.to_string(),
            name: name.to_string(),
            description: None,
            created_at: now,
            updated_at: now,
            values: scopes.iter().map(|s| flag_value(s, false)).collect(),
        }
    }

    pub fn project_user(
        user: &User,
        project_permissions: Vec<ProjectPermission>,
        scope_permissions: ScopePermissionMap,
    ) -> ProjectUser {
        ProjectUser {
            id: ProjectUserId::now_v7(),
            user_id: user.user_id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            joined_at: Utc::now(),
            project_permissions,
            scope_permissions,
        }
    }

    /// What [`seeded`] put on the server.
    #[derive(Debug, Clone)]
    pub struct Seed {
        pub admin: User,
        pub member: User,
        pub project: ProjectDetail,
        pub dev: Scope,
        pub prod: Scope,
        pub flag: FeatureFlag,
    }

    /// A server with an admin, a member of one project, `dev` and `prod`
    /// scopes and one flag disabled in both.
    ///
    /// The member may read flags in both scopes but toggle only in `dev`.
    pub fn seeded() -> (Arc<MockApi>, Seed) {
        let api = Arc::new(MockApi::new());
        let admin = user(ADMIN_USERNAME, GlobalRole::Admin);
        let member = user(MEMBER_USERNAME, GlobalRole::User);
        api.add_user(admin.clone(), ADMIN_PASSWORD);
        api.add_user(member.clone(), MEMBER_PASSWORD);

        let project = project("Web Shop", "web-shop");
        let project_id = project.id();
        api.add_project(project);

        let dev = scope(project_id, "Development", "dev");
        let prod = scope(project_id, "Production", "prod");
        api.add_scope(dev.clone());
        api.add_scope(prod.clone());

        let flag = feature_flag(project_id, "Checkout v2", "checkout-v2", &[dev.clone(), prod.clone()]);
        api.add_feature_flag(flag.clone());

        let mut grants = ScopePermissionMap::new();
        grants.insert(
            dev.id,
            vec![ScopePermission::ReadFeatureFlags, ScopePermission::UpdateFeatureFlags],
        );
        grants.insert(prod.id, vec![ScopePermission::ReadFeatureFlags]);
        api.add_member(
            project_id,
            project_user(&member, vec![ProjectPermission::ManageFeatureFlags], grants),
        );

        let project = api
            .stored_project(project_id)
            .unwrap_or_else(|| panic!("seeded project {} missing", project_id));
        let seed = Seed {
            admin,
            member,
            project,
            dev,
            prod,
            flag,
        };
        (api, seed)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions shared by the scenario tests.

    use super::*;
    use flagdeck_cache::{CacheKey, CacheStore};
    use flagdeck_client::{ClientResult, ErrorKind};

    #[track_caller]
    pub fn assert_error_kind<T: std::fmt::Debug>(result: &ClientResult<T>, expected: ErrorKind) {
        match result {
            Err(err) => assert_eq!(err.kind(), expected, "unexpected error: {}", err),
            Ok(value) => panic!("expected {:?} error, got Ok({:?})", expected, value),
        }
    }

    #[track_caller]
    pub fn assert_stale(cache: &CacheStore, key: &CacheKey) {
        assert_eq!(
            cache.is_stale(key).ok().flatten(),
            Some(true),
            "expected {} to be cached and stale",
            key
        );
    }

    #[track_caller]
    pub fn assert_absent(cache: &CacheStore, key: &CacheKey) {
        assert_eq!(
            cache.contains(key).ok(),
            Some(false),
            "expected {} to be evicted",
            key
        );
    }

    /// The cached flag's value for `scope_id`.
    pub fn cached_flag_value(cache: &CacheStore, flag_id: FeatureFlagId, scope_id: ScopeId) -> Option<bool> {
        cache
            .get::<FeatureFlag>(&CacheKey::FeatureFlag(flag_id))
            .ok()
            .flatten()
            .and_then(|read| read.value().value_for(scope_id).map(|v| v.is_enabled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_seeded_server_counts() {
        let (api, seed) = fixtures::seeded();
        assert_eq!(seed.project.scope_count, 2);
        assert_eq!(seed.project.feature_flag_count, 1);
        assert_eq!(seed.project.member_count, 1);

        let req = LoginRequest {
            username: fixtures::ADMIN_USERNAME.to_string(),
            password: fixtures::ADMIN_PASSWORD.to_string(),
        };
        let user = api.login(&req).await.unwrap();
        assert_eq!(user.global_role, GlobalRole::Admin);
        assert_eq!(api.list_scopes(seed.project.id()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_requires_session() {
        let (api, seed) = fixtures::seeded();
        let err = api.get_project(seed.project.id()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(401));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let (api, _) = fixtures::seeded();
        api.fail_next(Endpoint::Login, 500, Some("boom"));
        let req = LoginRequest {
            username: fixtures::ADMIN_USERNAME.to_string(),
            password: fixtures::ADMIN_PASSWORD.to_string(),
        };
        assert_eq!(api.login(&req).await.unwrap_err().status_code(), Some(500));
        assert!(api.login(&req).await.is_ok());
        assert_eq!(api.call_count(Endpoint::Login), 2);
    }

    #[tokio::test]
    async fn test_gate_parks_call_until_released() {
        let (api, _) = fixtures::seeded();
        let gate = api.gate(Endpoint::Logout);
        let task = {
            let api = Arc::clone(&api);
            tokio::spawn(async move { api.logout().await })
        };
        gate.entered().await;
        assert!(!task.is_finished());
        gate.release();
        assert!(task.await.unwrap().is_ok());
    }

    proptest! {
        #[test]
        fn prop_generated_flags_have_one_value_per_scope(flag in generators::arb_feature_flag(ProjectId::nil())) {
            let mut scopes: Vec<_> = flag.values.iter().map(|v| v.scope_id).collect();
            let total = scopes.len();
            scopes.sort();
            scopes.dedup();
            prop_assert_eq!(scopes.len(), total);
        }

        #[test]
        fn prop_scope_permission_map_has_no_empty_grants(
            map in generators::arb_scope_permission_map(vec![ScopeId::now_v7(), ScopeId::now_v7()])
        ) {
            prop_assert!(map.values().all(|perms| !perms.is_empty()));
        }
    }
}
