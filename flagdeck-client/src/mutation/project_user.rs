//! Project membership and permission mutations.

use super::{replace_in_list, MutationKind, OptimisticMutation, Settled};
use crate::admin::{call, AdminClient};
use flagdeck_cache::{CacheKey, CacheResult};
use flagdeck_core::{
    EntityType, InviteUserRequest, ProjectId, ProjectUser, UpdateUserPermissionsRequest, UserId,
    Validate,
};

impl AdminClient {
    pub async fn invite_user(&self, project_id: ProjectId, req: &InviteUserRequest) -> Settled<ProjectUser> {
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let mut mutation = self.mutation(EntityType::ProjectUser, MutationKind::Invite);
        membership_settle_keys(&mut mutation, project_id);
        let settled = mutation
            .commit(call(self.api.invite_user(project_id, req)))
            .await;
        self.finish("user", MutationKind::Invite, settled)
    }

    pub async fn remove_project_user(&self, project_id: ProjectId, user_id: UserId) -> Settled<()> {
        let key = CacheKey::ProjectUser(project_id, user_id);
        let mut mutation = self.mutation(EntityType::ProjectUser, MutationKind::Remove);
        if let Err(err) = mutation.capture(key).map(|_| ()) {
            return mutation.abort(err);
        }
        mutation.evict_on_success(key);
        membership_settle_keys(&mut mutation, project_id);
        let settled = mutation
            .commit(call(self.api.remove_project_user(project_id, user_id)))
            .await;
        self.finish("user", MutationKind::Remove, settled)
    }

    /// Both permission fields are replaced wholesale, never merged.
    pub async fn update_user_permissions(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        req: &UpdateUserPermissionsRequest,
    ) -> Settled<ProjectUser> {
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let mut mutation = self.mutation(EntityType::Permissions, MutationKind::Update);
        if let Err(err) = apply_permissions(&mut mutation, project_id, user_id, req) {
            return mutation.abort(err);
        }
        let is_self = self
            .session()
            .current_user()
            .is_some_and(|u| u.user_id == user_id);
        if is_self {
            mutation.invalidate_on_settle(CacheKey::MyPermissions(project_id));
        }
        let settled = mutation
            .commit(call(self.api.update_user_permissions(project_id, user_id, req)))
            .await;
        self.finish(EntityType::Permissions.noun(), MutationKind::Update, settled)
    }
}

/// Member list, invite candidates and the project's member count.
fn membership_settle_keys(mutation: &mut OptimisticMutation<'_>, project_id: ProjectId) {
    mutation
        .invalidate_on_settle(CacheKey::ProjectUsers(project_id))
        .invalidate_on_settle(CacheKey::AvailableUsers(project_id))
        .invalidate_on_settle(CacheKey::Project(project_id));
}

fn apply_permissions(
    mutation: &mut OptimisticMutation<'_>,
    project_id: ProjectId,
    user_id: UserId,
    req: &UpdateUserPermissionsRequest,
) -> CacheResult<()> {
    let replace = |member: ProjectUser| {
        member.with_permissions(req.project_permissions.clone(), req.scope_permissions.clone())
    };
    mutation.patch::<ProjectUser, _>(CacheKey::ProjectUser(project_id, user_id), replace)?;
    mutation.patch::<Vec<ProjectUser>, _>(CacheKey::ProjectUsers(project_id), |members| {
        replace_in_list(members, |m| m.user_id == user_id, replace)
    })?;
    Ok(())
}
