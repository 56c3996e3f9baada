//! Scope mutations.

use super::{
    owning_project, project_children, replace_in_list, MutationKind, OptimisticMutation, Settled,
};
use crate::admin::{call, AdminClient};
use flagdeck_cache::{CacheKey, CacheResult, KeyPrefix};
use flagdeck_core::{
    CreateScopeRequest, EntityType, ProjectId, Scope, ScopeId, UpdateScopeRequest, Validate,
};

const ENTITY: EntityType = EntityType::Scope;

impl AdminClient {
    pub async fn create_scope(&self, project_id: ProjectId, req: &CreateScopeRequest) -> Settled<Scope> {
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let mut mutation = self.mutation(ENTITY, MutationKind::Create);
        mutation
            .invalidate_on_settle(CacheKey::Scopes(project_id))
            .invalidate_on_settle(CacheKey::Project(project_id));
        let settled = mutation
            .commit(call(self.api.create_scope(project_id, req)))
            .await;
        self.finish(ENTITY.noun(), MutationKind::Create, settled)
    }

    pub async fn update_scope(&self, id: ScopeId, req: &UpdateScopeRequest) -> Settled<Scope> {
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let mut mutation = self.mutation(ENTITY, MutationKind::Update);
        if let Err(err) = self.apply_scope_update(&mut mutation, id, req) {
            return mutation.abort(err);
        }
        let settled = mutation.commit(call(self.api.update_scope(id, req))).await;
        self.finish(ENTITY.noun(), MutationKind::Update, settled)
    }

    fn apply_scope_update(
        &self,
        mutation: &mut OptimisticMutation<'_>,
        id: ScopeId,
        req: &UpdateScopeRequest,
    ) -> CacheResult<()> {
        let rename = |scope: Scope| Scope {
            name: req.name.clone(),
            description: req.description.clone(),
            ..scope
        };
        mutation.patch::<Scope, _>(CacheKey::Scope(id), rename)?;
        if let Some(project_id) = self.scope_project(mutation, id)? {
            mutation.patch::<Vec<Scope>, _>(CacheKey::Scopes(project_id), |scopes| {
                replace_in_list(scopes, |s| s.id == id, rename)
            })?;
        }
        Ok(())
    }

    /// The scope's detail is evicted. Everything in its project that carries
    /// per-scope rows is invalidated: the scope list, every flag (list and
    /// details), member permissions and the detail counts.
    pub async fn delete_scope(&self, id: ScopeId) -> Settled<()> {
        let key = CacheKey::Scope(id);
        let mut mutation = self.mutation(ENTITY, MutationKind::Delete);
        if let Err(err) = mutation.capture(key).map(|_| ()) {
            return mutation.abort(err);
        }
        let project_id = match self.scope_project(&mutation, id) {
            Ok(project_id) => project_id,
            Err(err) => return mutation.abort(err),
        };

        mutation.evict_on_success(key);
        match project_id {
            Some(project_id) => {
                let children = match project_children(&self.cache, project_id) {
                    Ok(children) => children,
                    Err(err) => return mutation.abort(err),
                };
                mutation
                    .invalidate_on_settle(CacheKey::Scopes(project_id))
                    .invalidate_on_settle(CacheKey::FeatureFlags(project_id))
                    .invalidate_on_settle(CacheKey::ProjectUsers(project_id))
                    .invalidate_on_settle(CacheKey::MyPermissions(project_id))
                    .invalidate_on_settle(CacheKey::Project(project_id));
                for flag_id in children.flags {
                    mutation.invalidate_on_settle(CacheKey::FeatureFlag(flag_id));
                }
                for user_id in children.members {
                    mutation.invalidate_on_settle(CacheKey::ProjectUser(project_id, user_id));
                }
            }
            None => {
                tracing::debug!(scope_id = %id, "owning project not cached; invalidating every scope list");
                mutation
                    .invalidate_prefix_on_settle(KeyPrefix::scopes())
                    .invalidate_prefix_on_settle(KeyPrefix::feature_flags())
                    .invalidate_prefix_on_settle(KeyPrefix::project_users())
                    .invalidate_prefix_on_settle(KeyPrefix::projects());
            }
        }

        let settled = mutation.commit(call(self.api.delete_scope(id))).await;
        self.finish(ENTITY.noun(), MutationKind::Delete, settled)
    }

    /// Project of a captured scope: its snapshot first, then the cached lists.
    fn scope_project(
        &self,
        mutation: &OptimisticMutation<'_>,
        id: ScopeId,
    ) -> CacheResult<Option<ProjectId>> {
        match mutation.snapshot::<Scope>(&CacheKey::Scope(id)) {
            Some(scope) => Ok(Some(scope.project_id)),
            None => owning_project::<Scope, _>(&self.cache, &KeyPrefix::scopes(), |s| s.id == id),
        }
    }
}
