//! The admin client: typed queries, mutations and notifications over one
//! session.

use crate::api::{ApiResult, FlagApi};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, ErrorKind};
use crate::mutation::{MutationKind, OptimisticMutation, Settled};
use crate::notifications::{Notification, NotificationCenter};
use crate::query::{Observer, QueryClient};
use crate::session::Session;
use flagdeck_cache::{CacheKey, CacheStore, Freshness};
use flagdeck_core::{
    AvailableUser, EntityType, FeatureFlag, FeatureFlagId, MyPermissions, PermissionContext,
    Project, ProjectDetail, ProjectId, ProjectUser, Scope, ScopeId, User,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub struct AdminClient {
    pub(crate) api: Arc<dyn FlagApi>,
    pub(crate) cache: Arc<CacheStore>,
    session: Arc<Session>,
    query: QueryClient,
    notifications: Mutex<NotificationCenter>,
}

impl std::fmt::Debug for AdminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminClient")
            .field("session", &self.session)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl AdminClient {
    pub fn new(api: Arc<dyn FlagApi>, config: &ClientConfig) -> Self {
        Self::with_options(
            api,
            config.event_capacity,
            config.stale_time(),
            config.notification_capacity,
        )
    }

    pub fn with_options(
        api: Arc<dyn FlagApi>,
        event_capacity: usize,
        stale_time: Duration,
        notification_capacity: usize,
    ) -> Self {
        let cache = Arc::new(CacheStore::new(event_capacity));
        let session = Arc::new(Session::new(Arc::clone(&api), Arc::clone(&cache)));
        Self {
            query: QueryClient::new(Arc::clone(&cache), stale_time),
            api,
            cache,
            session,
            notifications: Mutex::new(NotificationCenter::new(notification_capacity)),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn query(&self) -> &QueryClient {
        &self.query
    }

    // ========================================================================
    // NOTIFICATIONS
    // ========================================================================

    pub fn notify(&self, notification: Notification) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }

    /// Take every pending notification.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
    }

    pub fn dismiss_notification(&self, index: usize) -> Option<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dismiss(index)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    async fn read<T, Fut>(&self, key: CacheKey, freshness: Freshness, request: Fut) -> ClientResult<T>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = ApiResult<T>>,
    {
        let result = self
            .query
            .fetch(key, freshness, move || async move {
                request.await.map_err(ClientError::from)
            })
            .await;
        match result {
            Ok(read) => Ok(read.into_value()),
            Err(err) => {
                self.session.handle_error(&err);
                Err(err)
            }
        }
    }

    pub async fn projects(&self) -> ClientResult<Vec<Project>> {
        let freshness = self.query.default_freshness();
        self.read(CacheKey::Projects, freshness, self.api.list_projects())
            .await
    }

    pub async fn project(&self, id: ProjectId) -> ClientResult<ProjectDetail> {
        let freshness = self.query.default_freshness();
        self.read(CacheKey::Project(id), freshness, self.api.get_project(id))
            .await
    }

    pub async fn my_permissions(&self, project_id: ProjectId) -> ClientResult<MyPermissions> {
        let freshness = self.query.default_freshness();
        self.read(
            CacheKey::MyPermissions(project_id),
            freshness,
            self.api.my_permissions(project_id),
        )
        .await
    }

    pub async fn scopes(&self, project_id: ProjectId) -> ClientResult<Vec<Scope>> {
        let freshness = self.query.default_freshness();
        self.read(
            CacheKey::Scopes(project_id),
            freshness,
            self.api.list_scopes(project_id),
        )
        .await
    }

    pub async fn scope(&self, id: ScopeId) -> ClientResult<Scope> {
        let freshness = self.query.default_freshness();
        self.read(CacheKey::Scope(id), freshness, self.api.get_scope(id))
            .await
    }

    pub async fn feature_flags(&self, project_id: ProjectId) -> ClientResult<Vec<FeatureFlag>> {
        let freshness = self.query.default_freshness();
        self.read(
            CacheKey::FeatureFlags(project_id),
            freshness,
            self.api.list_feature_flags(project_id),
        )
        .await
    }

    pub async fn feature_flag(&self, id: FeatureFlagId) -> ClientResult<FeatureFlag> {
        let freshness = self.query.default_freshness();
        self.read(
            CacheKey::FeatureFlag(id),
            freshness,
            self.api.get_feature_flag(id),
        )
        .await
    }

    pub async fn project_users(&self, project_id: ProjectId) -> ClientResult<Vec<ProjectUser>> {
        let freshness = self.query.default_freshness();
        self.read(
            CacheKey::ProjectUsers(project_id),
            freshness,
            self.api.list_project_users(project_id),
        )
        .await
    }

    pub async fn available_users(&self, project_id: ProjectId) -> ClientResult<Vec<AvailableUser>> {
        // Membership changes elsewhere; always ask.
        self.read(
            CacheKey::AvailableUsers(project_id),
            Freshness::consistent(),
            self.api.available_users(project_id),
        )
        .await
    }

    pub async fn users(&self) -> ClientResult<Vec<User>> {
        let freshness = self.query.default_freshness();
        self.read(CacheKey::Users, freshness, self.api.list_users())
            .await
    }

    /// Permission gate for `project_id`, from the signed-in user and their
    /// grants on that project.
    pub async fn permission_context(&self, project_id: ProjectId) -> ClientResult<PermissionContext> {
        let user = self.session.current_user();
        let permissions = match self.my_permissions(project_id).await {
            Ok(permissions) => Some(permissions),
            Err(err) if err.kind() == ErrorKind::Forbidden || err.kind() == ErrorKind::NotFound => {
                None
            }
            Err(err) => return Err(err),
        };
        Ok(PermissionContext::new(user, permissions))
    }

    // ========================================================================
    // OBSERVERS
    // ========================================================================

    fn observe_with<T, F, Fut>(&self, key: CacheKey, fetch: F) -> ClientResult<Observer>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(Arc<dyn FlagApi>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        let api = Arc::clone(&self.api);
        let session = Arc::clone(&self.session);
        self.query.observe(key, move || {
            let request = fetch(Arc::clone(&api));
            let session = Arc::clone(&session);
            async move {
                request.await.map_err(|err| {
                    let err = ClientError::from(err);
                    session.handle_error(&err);
                    err
                })
            }
        })
    }

    pub fn observe_project(&self, id: ProjectId) -> ClientResult<Observer> {
        self.observe_with(CacheKey::Project(id), move |api| async move {
            api.get_project(id).await
        })
    }

    pub fn observe_scopes(&self, project_id: ProjectId) -> ClientResult<Observer> {
        self.observe_with(CacheKey::Scopes(project_id), move |api| async move {
            api.list_scopes(project_id).await
        })
    }

    pub fn observe_feature_flags(&self, project_id: ProjectId) -> ClientResult<Observer> {
        self.observe_with(CacheKey::FeatureFlags(project_id), move |api| async move {
            api.list_feature_flags(project_id).await
        })
    }

    pub fn observe_feature_flag(&self, id: FeatureFlagId) -> ClientResult<Observer> {
        self.observe_with(CacheKey::FeatureFlag(id), move |api| async move {
            api.get_feature_flag(id).await
        })
    }

    pub fn observe_project_users(&self, project_id: ProjectId) -> ClientResult<Observer> {
        self.observe_with(CacheKey::ProjectUsers(project_id), move |api| async move {
            api.list_project_users(project_id).await
        })
    }

    // ========================================================================
    // MUTATION PLUMBING
    // ========================================================================

    pub(crate) fn mutation(&self, entity: EntityType, kind: MutationKind) -> OptimisticMutation<'_> {
        OptimisticMutation::new(&self.cache, entity, kind)
    }

    /// Shared tail of every policy: global error handling and the outcome
    /// notification.
    pub(crate) fn finish<T>(&self, entity: &str, kind: MutationKind, settled: Settled<T>) -> Settled<T> {
        match &settled.result {
            Ok(_) => self.notify(Notification::success(entity, kind.past())),
            Err(err) => {
                self.session.handle_error(err);
                if err.kind() != ErrorKind::Unauthorized {
                    let reason = err.user_message();
                    self.notify(Notification::error(entity, kind.verb(), Some(&reason)));
                }
            }
        }
        settled
    }
}

/// Map a transport result into the client taxonomy.
pub(crate) async fn call<T>(request: impl Future<Output = ApiResult<T>>) -> ClientResult<T> {
    request.await.map_err(ClientError::from)
}
