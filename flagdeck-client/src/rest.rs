//! `reqwest` implementation of [`FlagApi`].

use crate::api::{ApiClientError, ApiResult, FlagApi};
use crate::config::ClientConfig;
use async_trait::async_trait;
use flagdeck_core::{
    AvailableUser, ChangePasswordRequest, CreateFeatureFlagRequest, CreateProjectRequest,
    CreateScopeRequest, CreateUserRequest, FeatureFlag, FeatureFlagId, FeatureFlagValue,
    InviteUserRequest, LoginRequest, MyPermissions, ProblemDetails, Project, ProjectDetail,
    ProjectId, ProjectUser, RegenerateApiKeyResponse, Scope, ScopeId, UpdateFeatureFlagRequest,
    UpdateFeatureFlagValueRequest, UpdateProjectRequest, UpdateScopeRequest,
    UpdateUserPermissionsRequest, UpdateUserRequest, User, UserId,
};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// HTTP client for the admin API.
///
/// The session lives in an HTTP-only cookie set by `login`; the cookie store
/// sends it back on every request.
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiClientError> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send<B>(&self, method: Method, path: &str, body: Option<&B>) -> ApiResult<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "api request");
        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await?;
        let problem = serde_json::from_str::<ProblemDetails>(&text).ok();
        tracing::debug!(
            %method,
            path,
            status = status.as_u16(),
            detail = problem.as_ref().and_then(|p| p.message()),
            "api request failed"
        );
        Err(ApiClientError::Status {
            status: status.as_u16(),
            problem,
        })
    }

    async fn json<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.send(method, path, body).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// For endpoints that answer `204` or an ignorable body.
    async fn empty<B>(&self, method: Method, path: &str, body: Option<&B>) -> ApiResult<()>
    where
        B: Serialize + ?Sized,
    {
        let response = self.send(method, path, body).await?;
        if response.status() != StatusCode::NO_CONTENT {
            // Drain so the connection can be reused.
            let _ = response.bytes().await?;
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.json::<T, ()>(Method::GET, path, None).await
    }
}

#[async_trait]
impl FlagApi for RestClient {
    async fn login(&self, req: &LoginRequest) -> ApiResult<User> {
        self.json(Method::POST, "/v1/auth/login", Some(req)).await
    }

    async fn logout(&self) -> ApiResult<()> {
        self.empty::<()>(Method::POST, "/v1/auth/logout", None).await
    }

    async fn me(&self) -> ApiResult<User> {
        self.get("/v1/auth/me").await
    }

    async fn change_password(&self, req: &ChangePasswordRequest) -> ApiResult<()> {
        self.empty(Method::POST, "/v1/auth/change-password", Some(req))
            .await
    }

    async fn list_projects(&self) -> ApiResult<Vec<Project>> {
        self.get("/v1/projects").await
    }

    async fn get_project(&self, id: ProjectId) -> ApiResult<ProjectDetail> {
        self.get(&format!("/v1/projects/{}", id)).await
    }

    async fn create_project(&self, req: &CreateProjectRequest) -> ApiResult<ProjectDetail> {
        self.json(Method::POST, "/v1/projects", Some(req)).await
    }

    async fn update_project(
        &self,
        id: ProjectId,
        req: &UpdateProjectRequest,
    ) -> ApiResult<ProjectDetail> {
        self.json(Method::PUT, &format!("/v1/projects/{}", id), Some(req))
            .await
    }

    async fn delete_project(&self, id: ProjectId) -> ApiResult<()> {
        self.empty::<()>(Method::DELETE, &format!("/v1/projects/{}", id), None)
            .await
    }

    async fn archive_project(&self, id: ProjectId) -> ApiResult<()> {
        self.empty::<()>(Method::POST, &format!("/v1/projects/{}/archive", id), None)
            .await
    }

    async fn unarchive_project(&self, id: ProjectId) -> ApiResult<()> {
        self.empty::<()>(Method::POST, &format!("/v1/projects/{}/unarchive", id), None)
            .await
    }

    async fn regenerate_api_key(&self, id: ProjectId) -> ApiResult<RegenerateApiKeyResponse> {
        let path = format!("/v1/projects/{}/regenerate-api-key", id);
        self.json::<_, ()>(Method::POST, &path, None).await
    }

    async fn my_permissions(&self, id: ProjectId) -> ApiResult<MyPermissions> {
        self.get(&format!("/v1/projects/{}/my-permissions", id))
            .await
    }

    async fn list_scopes(&self, project_id: ProjectId) -> ApiResult<Vec<Scope>> {
        self.get(&format!("/v1/projects/{}/scopes", project_id))
            .await
    }

    async fn create_scope(
        &self,
        project_id: ProjectId,
        req: &CreateScopeRequest,
    ) -> ApiResult<Scope> {
        let path = format!("/v1/projects/{}/scopes", project_id);
        self.json(Method::POST, &path, Some(req)).await
    }

    async fn get_scope(&self, id: ScopeId) -> ApiResult<Scope> {
        self.get(&format!("/v1/scopes/{}", id)).await
    }

    async fn update_scope(&self, id: ScopeId, req: &UpdateScopeRequest) -> ApiResult<Scope> {
        self.json(Method::PUT, &format!("/v1/scopes/{}", id), Some(req))
            .await
    }

    async fn delete_scope(&self, id: ScopeId) -> ApiResult<()> {
        self.empty::<()>(Method::DELETE, &format!("/v1/scopes/{}", id), None)
            .await
    }

    async fn list_feature_flags(&self, project_id: ProjectId) -> ApiResult<Vec<FeatureFlag>> {
        self.get(&format!("/v1/projects/{}/feature-flags", project_id))
            .await
    }

    async fn create_feature_flag(
        &self,
        project_id: ProjectId,
        req: &CreateFeatureFlagRequest,
    ) -> ApiResult<FeatureFlag> {
        let path = format!("/v1/projects/{}/feature-flags", project_id);
        self.json(Method::POST, &path, Some(req)).await
    }

    async fn get_feature_flag(&self, id: FeatureFlagId) -> ApiResult<FeatureFlag> {
        self.get(&format!("/v1/feature-flags/{}", id)).await
    }

    async fn update_feature_flag(
        &self,
        id: FeatureFlagId,
        req: &UpdateFeatureFlagRequest,
    ) -> ApiResult<FeatureFlag> {
        self.json(Method::PUT, &format!("/v1/feature-flags/{}", id), Some(req))
            .await
    }

    async fn delete_feature_flag(&self, id: FeatureFlagId) -> ApiResult<()> {
        self.empty::<()>(Method::DELETE, &format!("/v1/feature-flags/{}", id), None)
            .await
    }

    async fn update_feature_flag_value(
        &self,
        id: FeatureFlagId,
        req: &UpdateFeatureFlagValueRequest,
    ) -> ApiResult<FeatureFlagValue> {
        let path = format!("/v1/feature-flags/{}/values", id);
        self.json(Method::PUT, &path, Some(req)).await
    }

    async fn list_project_users(&self, project_id: ProjectId) -> ApiResult<Vec<ProjectUser>> {
        self.get(&format!("/v1/projects/{}/users", project_id))
            .await
    }

    async fn available_users(&self, project_id: ProjectId) -> ApiResult<Vec<AvailableUser>> {
        self.get(&format!("/v1/projects/{}/users/available", project_id))
            .await
    }

    async fn invite_user(
        &self,
        project_id: ProjectId,
        req: &InviteUserRequest,
    ) -> ApiResult<ProjectUser> {
        let path = format!("/v1/projects/{}/users", project_id);
        self.json(Method::POST, &path, Some(req)).await
    }

    async fn remove_project_user(&self, project_id: ProjectId, user_id: UserId) -> ApiResult<()> {
        let path = format!("/v1/projects/{}/users/{}", project_id, user_id);
        self.empty::<()>(Method::DELETE, &path, None).await
    }

    async fn update_user_permissions(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        req: &UpdateUserPermissionsRequest,
    ) -> ApiResult<ProjectUser> {
        let path = format!("/v1/projects/{}/users/{}/permissions", project_id, user_id);
        self.json(Method::PUT, &path, Some(req)).await
    }

    async fn list_users(&self) -> ApiResult<Vec<User>> {
        self.get("/v1/users").await
    }

    async fn create_user(&self, req: &CreateUserRequest) -> ApiResult<User> {
        self.json(Method::POST, "/v1/users", Some(req)).await
    }

    async fn update_user(&self, id: UserId, req: &UpdateUserRequest) -> ApiResult<User> {
        self.json(Method::PUT, &format!("/v1/users/{}", id), Some(req))
            .await
    }

    async fn delete_user(&self, id: UserId) -> ApiResult<()> {
        self.empty::<()>(Method::DELETE, &format!("/v1/users/{}", id), None)
            .await
    }
}
