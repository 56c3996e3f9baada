//! The REST boundary.
//!
//! [`FlagApi`] has one method per server endpoint. [`crate::rest::RestClient`]
//! is the production implementation; tests substitute an in-memory fake.

use async_trait::async_trait;
use flagdeck_core::{
    AvailableUser, ChangePasswordRequest, CreateFeatureFlagRequest, CreateProjectRequest,
    CreateScopeRequest, CreateUserRequest, FeatureFlag, FeatureFlagId, FeatureFlagValue,
    InviteUserRequest, LoginRequest, MyPermissions, ProblemDetails, Project, ProjectDetail,
    ProjectId, ProjectUser, RegenerateApiKeyResponse, Scope, ScopeId, UpdateFeatureFlagRequest,
    UpdateFeatureFlagValueRequest, UpdateProjectRequest, UpdateScopeRequest,
    UpdateUserPermissionsRequest, UpdateUserRequest, User, UserId,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP {status}: {}", problem_summary(.problem))]
    Status {
        status: u16,
        problem: Option<ProblemDetails>,
    },
    #[error("Config error: {0}")]
    Config(String),
}

impl ApiClientError {
    /// Build a status error carrying a problem body with `detail`.
    pub fn status(status: u16, detail: impl Into<String>) -> Self {
        Self::Status {
            status,
            problem: Some(ProblemDetails {
                status: Some(status),
                detail: Some(detail.into()),
                ..Default::default()
            }),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn problem_summary(problem: &Option<ProblemDetails>) -> String {
    problem
        .as_ref()
        .and_then(|p| p.message())
        .unwrap_or("no details")
        .to_string()
}

pub type ApiResult<T> = Result<T, ApiClientError>;

/// Every endpoint the admin client depends on.
#[async_trait]
pub trait FlagApi: Send + Sync {
    // Auth
    async fn login(&self, req: &LoginRequest) -> ApiResult<User>;
    async fn logout(&self) -> ApiResult<()>;
    async fn me(&self) -> ApiResult<User>;
    async fn change_password(&self, req: &ChangePasswordRequest) -> ApiResult<()>;

    // Projects
    async fn list_projects(&self) -> ApiResult<Vec<Project>>;
    async fn get_project(&self, id: ProjectId) -> ApiResult<ProjectDetail>;
    async fn create_project(&self, req: &CreateProjectRequest) -> ApiResult<ProjectDetail>;
    async fn update_project(
        &self,
        id: ProjectId,
        req: &UpdateProjectRequest,
    ) -> ApiResult<ProjectDetail>;
    async fn delete_project(&self, id: ProjectId) -> ApiResult<()>;
    async fn archive_project(&self, id: ProjectId) -> ApiResult<()>;
    async fn unarchive_project(&self, id: ProjectId) -> ApiResult<()>;
    async fn regenerate_api_key(&self, id: ProjectId) -> ApiResult<RegenerateApiKeyResponse>;
    async fn my_permissions(&self, id: ProjectId) -> ApiResult<MyPermissions>;

    // Scopes
    async fn list_scopes(&self, project_id: ProjectId) -> ApiResult<Vec<Scope>>;
    async fn create_scope(&self, project_id: ProjectId, req: &CreateScopeRequest)
        -> ApiResult<Scope>;
    async fn get_scope(&self, id: ScopeId) -> ApiResult<Scope>;
    async fn update_scope(&self, id: ScopeId, req: &UpdateScopeRequest) -> ApiResult<Scope>;
    async fn delete_scope(&self, id: ScopeId) -> ApiResult<()>;

    // Feature flags
    async fn list_feature_flags(&self, project_id: ProjectId) -> ApiResult<Vec<FeatureFlag>>;
    async fn create_feature_flag(
        &self,
        project_id: ProjectId,
        req: &CreateFeatureFlagRequest,
    ) -> ApiResult<FeatureFlag>;
    async fn get_feature_flag(&self, id: FeatureFlagId) -> ApiResult<FeatureFlag>;
    async fn update_feature_flag(
        &self,
        id: FeatureFlagId,
        req: &UpdateFeatureFlagRequest,
    ) -> ApiResult<FeatureFlag>;
    async fn delete_feature_flag(&self, id: FeatureFlagId) -> ApiResult<()>;
    async fn update_feature_flag_value(
        &self,
        id: FeatureFlagId,
        req: &UpdateFeatureFlagValueRequest,
    ) -> ApiResult<FeatureFlagValue>;

    // Project users
    async fn list_project_users(&self, project_id: ProjectId) -> ApiResult<Vec<ProjectUser>>;
    async fn available_users(&self, project_id: ProjectId) -> ApiResult<Vec<AvailableUser>>;
    async fn invite_user(
        &self,
        project_id: ProjectId,
        req: &InviteUserRequest,
    ) -> ApiResult<ProjectUser>;
    async fn remove_project_user(&self, project_id: ProjectId, user_id: UserId) -> ApiResult<()>;
    async fn update_user_permissions(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        req: &UpdateUserPermissionsRequest,
    ) -> ApiResult<ProjectUser>;

    // Global users
    async fn list_users(&self) -> ApiResult<Vec<User>>;
    async fn create_user(&self, req: &CreateUserRequest) -> ApiResult<User>;
    async fn update_user(&self, id: UserId, req: &UpdateUserRequest) -> ApiResult<User>;
    async fn delete_user(&self, id: UserId) -> ApiResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display_uses_problem_message() {
        let err = ApiClientError::status(409, "Alias already exists");
        assert_eq!(err.to_string(), "HTTP 409: Alias already exists");
        assert_eq!(err.status_code(), Some(409));

        let bare = ApiClientError::Status {
            status: 500,
            problem: None,
        };
        assert_eq!(bare.to_string(), "HTTP 500: no details");
    }
}
