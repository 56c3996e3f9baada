//! Optimistic mutations.
//!
//! Every write runs through an [`OptimisticMutation`]:
//!
//! ```text
//! Idle -> Applying -> Settling -> Invalidated   (server accepted)
//!                             \-> RolledBack    (server rejected)
//! ```
//!
//! `capture` cancels in-flight reads and snapshots a key before any
//! optimistic write touches it. On failure every snapshot is restored whole.
//! On success the eviction keys are removed. Either way the settle keys are
//! invalidated so observers refetch the server's version.
//!
//! The per-entity policies live in the submodules as methods on
//! [`AdminClient`](crate::AdminClient).

mod flag;
mod project;
mod project_user;
mod scope;
mod user;

use crate::error::{ClientError, ClientResult};
use flagdeck_cache::{CacheKey, CacheResult, CacheStore, KeyPrefix};
use flagdeck_core::{
    EntityType, FeatureFlag, FeatureFlagId, ProjectId, ProjectUser, Scope, ScopeId, UserId,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    /// Snapshots taken; optimistic values may be in the cache.
    Applying,
    /// The request has resolved; the cache is being reconciled.
    Settling,
    Invalidated,
    RolledBack,
}

impl MutationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalidated | Self::RolledBack)
    }
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Applying => "applying",
            Self::Settling => "settling",
            Self::Invalidated => "invalidated",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// Outcome of a mutation. Failures are carried here, never panicked.
#[derive(Debug)]
pub struct Settled<T> {
    pub state: MutationState,
    pub result: ClientResult<T>,
}

impl<T> Settled<T> {
    /// Rejected before anything touched the cache (validation).
    pub fn rejected(err: impl Into<ClientError>) -> Self {
        Self {
            state: MutationState::Idle,
            result: Err(err.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ClientError> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> ClientResult<T> {
        self.result
    }
}

/// What a mutation does, for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Archive,
    Unarchive,
    Regenerate,
    Invite,
    Remove,
}

impl MutationKind {
    /// Verb for "Failed to {verb} {entity}".
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Archive => "archive",
            Self::Unarchive => "unarchive",
            Self::Regenerate => "regenerate",
            Self::Invite => "invite",
            Self::Remove => "remove",
        }
    }

    /// Participle for "{Entity} {past} successfully".
    pub fn past(&self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Update => "updated",
            Self::Delete => "deleted",
            Self::Archive => "archived",
            Self::Unarchive => "unarchived",
            Self::Regenerate => "regenerated",
            Self::Invite => "invited",
            Self::Remove => "removed",
        }
    }
}

/// One optimistic write against the cache.
pub struct OptimisticMutation<'a> {
    cache: &'a CacheStore,
    entity: EntityType,
    kind: MutationKind,
    state: MutationState,
    snapshots: Vec<(CacheKey, Option<Value>)>,
    evict: Vec<CacheKey>,
    settle: Vec<CacheKey>,
    settle_prefixes: Vec<KeyPrefix>,
}

impl<'a> OptimisticMutation<'a> {
    pub fn new(cache: &'a CacheStore, entity: EntityType, kind: MutationKind) -> Self {
        Self {
            cache,
            entity,
            kind,
            state: MutationState::Idle,
            snapshots: Vec::new(),
            evict: Vec::new(),
            settle: Vec::new(),
            settle_prefixes: Vec::new(),
        }
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    pub fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    fn transition(&mut self, next: MutationState) {
        tracing::debug!(
            entity = %self.entity,
            action = self.kind.verb(),
            from = %self.state,
            to = %next,
            "mutation state"
        );
        self.state = next;
    }

    fn is_captured(&self, key: &CacheKey) -> bool {
        self.snapshots.iter().any(|(k, _)| k == key)
    }

    /// Cancel any read in flight for `key` and retain its current value.
    ///
    /// Captured keys are restored on failure and invalidated on settle.
    /// Capturing a key twice keeps the first snapshot.
    pub fn capture(&mut self, key: CacheKey) -> CacheResult<&mut Self> {
        if self.state == MutationState::Idle {
            self.transition(MutationState::Applying);
        }
        if !self.is_captured(&key) {
            self.cache.cancel_in_flight(&key)?;
            let snapshot = self.cache.get_raw(&key)?;
            self.snapshots.push((key, snapshot));
        }
        Ok(self)
    }

    /// Typed view of a captured snapshot.
    pub fn snapshot<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.snapshots
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.clone())
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Optimistically write `value` at `key`, capturing it first.
    pub fn apply<T: Serialize>(&mut self, key: CacheKey, value: &T) -> CacheResult<()> {
        self.capture(key)?;
        self.cache.set(&key, value)
    }

    /// Optimistically transform the cached value at `key`, capturing it first.
    /// Returns false when nothing is cached there.
    pub fn patch<T, F>(&mut self, key: CacheKey, f: F) -> CacheResult<bool>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(T) -> T,
    {
        self.capture(key)?;
        self.cache.update(&key, f)
    }

    /// Remove `key` once the server confirms.
    pub fn evict_on_success(&mut self, key: CacheKey) -> &mut Self {
        if !self.evict.contains(&key) {
            self.evict.push(key);
        }
        self
    }

    pub fn invalidate_on_settle(&mut self, key: CacheKey) -> &mut Self {
        if !self.settle.contains(&key) {
            self.settle.push(key);
        }
        self
    }

    pub fn invalidate_prefix_on_settle(&mut self, prefix: KeyPrefix) -> &mut Self {
        self.settle_prefixes.push(prefix);
        self
    }

    /// Give up before the request is sent, restoring every snapshot.
    pub fn abort<T>(mut self, err: impl Into<ClientError>) -> Settled<T> {
        if let Err(rollback) = self.rollback() {
            tracing::warn!(entity = %self.entity, error = %rollback, "rollback failed");
        }
        self.transition(MutationState::RolledBack);
        Settled {
            state: MutationState::RolledBack,
            result: Err(err.into()),
        }
    }

    /// Await the request and reconcile the cache with its outcome.
    pub async fn commit<T, Fut>(self, request: Fut) -> Settled<T>
    where
        Fut: Future<Output = ClientResult<T>>,
    {
        self.commit_with(request, |_, _| Ok(())).await
    }

    /// Like [`commit`](Self::commit), with `on_success` run against the
    /// cache after eviction and before invalidation.
    pub async fn commit_with<T, Fut, S>(mut self, request: Fut, on_success: S) -> Settled<T>
    where
        Fut: Future<Output = ClientResult<T>>,
        S: FnOnce(&CacheStore, &T) -> CacheResult<()>,
    {
        if self.state == MutationState::Idle {
            self.transition(MutationState::Applying);
        }
        let result = request.await;
        self.transition(MutationState::Settling);

        let reconciled = match &result {
            Ok(value) => self.on_success(value, on_success),
            Err(err) => {
                tracing::debug!(entity = %self.entity, error = %err, "mutation failed; rolling back");
                self.rollback()
            }
        };
        if let Err(err) = reconciled {
            tracing::warn!(entity = %self.entity, error = %err, "cache reconciliation failed");
        }
        if let Err(err) = self.invalidate_settled(result.is_ok()) {
            tracing::warn!(entity = %self.entity, error = %err, "settle invalidation failed");
        }

        let terminal = if result.is_ok() {
            MutationState::Invalidated
        } else {
            MutationState::RolledBack
        };
        self.transition(terminal);
        Settled {
            state: terminal,
            result,
        }
    }

    fn on_success<T, S>(&self, value: &T, on_success: S) -> CacheResult<()>
    where
        S: FnOnce(&CacheStore, &T) -> CacheResult<()>,
    {
        for key in &self.evict {
            self.cache.remove(key)?;
        }
        on_success(self.cache, value)
    }

    /// Restore every snapshot, newest capture first.
    fn rollback(&self) -> CacheResult<()> {
        for (key, snapshot) in self.snapshots.iter().rev() {
            self.cache.restore(key, snapshot.clone())?;
        }
        Ok(())
    }

    fn invalidate_settled(&self, succeeded: bool) -> CacheResult<()> {
        let evicted = |key: &CacheKey| succeeded && self.evict.contains(key);
        let captured = self.snapshots.iter().map(|(k, _)| k);
        let mut done: Vec<CacheKey> = Vec::new();
        for key in captured.chain(self.settle.iter()) {
            if evicted(key) || done.contains(key) {
                continue;
            }
            self.cache.invalidate(key)?;
            done.push(*key);
        }
        for prefix in &self.settle_prefixes {
            self.cache.invalidate_prefix(prefix)?;
        }
        Ok(())
    }
}

/// The project whose cached list under `prefix` holds an item matching `is_target`.
pub(crate) fn owning_project<T, F>(
    cache: &CacheStore,
    prefix: &KeyPrefix,
    is_target: F,
) -> CacheResult<Option<ProjectId>>
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    for key in cache.keys(prefix)? {
        let Some(project_id) = key.project_id() else {
            continue;
        };
        // Detail keys share the prefix but are not lists.
        let Ok(Some(list)) = cache.get::<Vec<T>>(&key) else {
            continue;
        };
        if list.value().iter().any(&is_target) {
            return Ok(Some(project_id));
        }
    }
    Ok(None)
}

/// Ids of the cached entities that belong to one project.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ProjectChildren {
    pub scopes: Vec<ScopeId>,
    pub flags: Vec<FeatureFlagId>,
    pub members: Vec<UserId>,
}

/// Collect a project's children from its cached lists and from every cached
/// detail entry that names it.
pub(crate) fn project_children(
    cache: &CacheStore,
    project_id: ProjectId,
) -> CacheResult<ProjectChildren> {
    let mut children = ProjectChildren::default();
    for key in cache.keys(&KeyPrefix::scopes())? {
        match key {
            CacheKey::Scopes(pid) if pid == project_id => {
                if let Some(list) = cache.get::<Vec<Scope>>(&key)? {
                    push_ids(&mut children.scopes, list.value().iter().map(|s| s.id));
                }
            }
            CacheKey::Scope(_) => {
                if let Some(scope) = cache.get::<Scope>(&key)? {
                    if scope.value().project_id == project_id {
                        push_ids(&mut children.scopes, [scope.value().id]);
                    }
                }
            }
            _ => {}
        }
    }
    for key in cache.keys(&KeyPrefix::feature_flags())? {
        match key {
            CacheKey::FeatureFlags(pid) if pid == project_id => {
                if let Some(list) = cache.get::<Vec<FeatureFlag>>(&key)? {
                    push_ids(&mut children.flags, list.value().iter().map(|f| f.id));
                }
            }
            CacheKey::FeatureFlag(_) => {
                if let Some(flag) = cache.get::<FeatureFlag>(&key)? {
                    if flag.value().project_id == project_id {
                        push_ids(&mut children.flags, [flag.value().id]);
                    }
                }
            }
            _ => {}
        }
    }
    for key in cache.keys(&KeyPrefix::project_users())? {
        match key {
            CacheKey::ProjectUsers(pid) if pid == project_id => {
                if let Some(list) = cache.get::<Vec<ProjectUser>>(&key)? {
                    push_ids(&mut children.members, list.value().iter().map(|m| m.user_id));
                }
            }
            CacheKey::ProjectUser(pid, uid) if pid == project_id => {
                push_ids(&mut children.members, [uid]);
            }
            _ => {}
        }
    }
    Ok(children)
}

fn push_ids<I: PartialEq>(ids: &mut Vec<I>, found: impl IntoIterator<Item = I>) {
    for id in found {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
}

/// Replace the first item matching `is_target` in a cached list.
pub(crate) fn replace_in_list<T, F, M>(items: Vec<T>, is_target: F, modify: M) -> Vec<T>
where
    F: Fn(&T) -> bool,
    M: Fn(T) -> T,
{
    items
        .into_iter()
        .map(|item| if is_target(&item) { modify(item) } else { item })
        .collect()
}
