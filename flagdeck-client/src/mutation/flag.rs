//! Feature flag mutations, including the per-scope value toggle.

use super::{owning_project, replace_in_list, MutationKind, OptimisticMutation, Settled};
use crate::admin::{call, AdminClient};
use chrono::Utc;
use flagdeck_cache::{CacheKey, CacheResult, KeyPrefix};
use flagdeck_core::{
    CreateFeatureFlagRequest, EntityType, FeatureFlag, FeatureFlagId, FeatureFlagValue, ProjectId,
    ScopeId, UpdateFeatureFlagRequest, UpdateFeatureFlagValueRequest, Validate,
};

const ENTITY: EntityType = EntityType::FeatureFlag;

impl AdminClient {
    pub async fn create_feature_flag(
        &self,
        project_id: ProjectId,
        req: &CreateFeatureFlagRequest,
    ) -> Settled<FeatureFlag> {
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let mut mutation = self.mutation(ENTITY, MutationKind::Create);
        mutation
            .invalidate_on_settle(CacheKey::FeatureFlags(project_id))
            .invalidate_on_settle(CacheKey::Project(project_id));
        let settled = mutation
            .commit(call(self.api.create_feature_flag(project_id, req)))
            .await;
        self.finish(ENTITY.noun(), MutationKind::Create, settled)
    }

    pub async fn update_feature_flag(
        &self,
        id: FeatureFlagId,
        req: &UpdateFeatureFlagRequest,
    ) -> Settled<FeatureFlag> {
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let mut mutation = self.mutation(ENTITY, MutationKind::Update);
        let edit = |flag: FeatureFlag| FeatureFlag {
            name: req.name.clone(),
            key: req.key.clone(),
            description: req.description.clone(),
            ..flag
        };
        if let Err(err) = self.apply_to_flag(&mut mutation, id, edit) {
            return mutation.abort(err);
        }
        let settled = mutation
            .commit(call(self.api.update_feature_flag(id, req)))
            .await;
        self.finish(ENTITY.noun(), MutationKind::Update, settled)
    }

    pub async fn delete_feature_flag(&self, id: FeatureFlagId) -> Settled<()> {
        let key = CacheKey::FeatureFlag(id);
        let mut mutation = self.mutation(ENTITY, MutationKind::Delete);
        if let Err(err) = mutation.capture(key).map(|_| ()) {
            return mutation.abort(err);
        }
        let project_id = match self.flag_project(&mutation, id) {
            Ok(project_id) => project_id,
            Err(err) => return mutation.abort(err),
        };

        mutation.evict_on_success(key);
        match project_id {
            Some(project_id) => {
                mutation
                    .invalidate_on_settle(CacheKey::FeatureFlags(project_id))
                    .invalidate_on_settle(CacheKey::Project(project_id));
            }
            None => {
                mutation
                    .invalidate_prefix_on_settle(KeyPrefix::feature_flags())
                    .invalidate_prefix_on_settle(KeyPrefix::projects());
            }
        }

        let settled = mutation
            .commit(call(self.api.delete_feature_flag(id)))
            .await;
        self.finish(ENTITY.noun(), MutationKind::Delete, settled)
    }

    /// Toggle one flag in one scope.
    ///
    /// Only the value row for `scope_id` changes, in the flag's detail and in
    /// its copy inside the project's flag list. Every other scope's value is
    /// left as it was.
    pub async fn update_feature_flag_value(
        &self,
        id: FeatureFlagId,
        scope_id: ScopeId,
        is_enabled: bool,
    ) -> Settled<FeatureFlagValue> {
        let req = UpdateFeatureFlagValueRequest {
            scope_id,
            is_enabled,
        };
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let mut mutation = self.mutation(EntityType::FeatureFlagValue, MutationKind::Update);
        let now = Utc::now();
        let toggle = |flag: FeatureFlag| flag.with_scope_value(scope_id, is_enabled, now);
        if let Err(err) = self.apply_to_flag(&mut mutation, id, toggle) {
            return mutation.abort(err);
        }
        let settled = mutation
            .commit(call(self.api.update_feature_flag_value(id, &req)))
            .await;
        self.finish(EntityType::FeatureFlagValue.noun(), MutationKind::Update, settled)
    }

    /// Apply `change` to the flag's detail and to its entry in the owning
    /// project's list, capturing both. The list is invalidated on settle
    /// even when it is not cached.
    fn apply_to_flag<F>(
        &self,
        mutation: &mut OptimisticMutation<'_>,
        id: FeatureFlagId,
        change: F,
    ) -> CacheResult<()>
    where
        F: Fn(FeatureFlag) -> FeatureFlag,
    {
        mutation.patch::<FeatureFlag, _>(CacheKey::FeatureFlag(id), &change)?;
        match self.flag_project(mutation, id)? {
            Some(project_id) => {
                mutation.patch::<Vec<FeatureFlag>, _>(CacheKey::FeatureFlags(project_id), |flags| {
                    replace_in_list(flags, |f| f.id == id, &change)
                })?;
            }
            None => {
                mutation.invalidate_prefix_on_settle(KeyPrefix::feature_flags());
            }
        }
        Ok(())
    }

    /// Project of a captured flag: its snapshot first, then the cached lists.
    fn flag_project(
        &self,
        mutation: &OptimisticMutation<'_>,
        id: FeatureFlagId,
    ) -> CacheResult<Option<ProjectId>> {
        match mutation.snapshot::<FeatureFlag>(&CacheKey::FeatureFlag(id)) {
            Some(flag) => Ok(Some(flag.project_id)),
            None => owning_project::<FeatureFlag, _>(
                &self.cache,
                &KeyPrefix::feature_flags(),
                |f| f.id == id,
            ),
        }
    }
}
