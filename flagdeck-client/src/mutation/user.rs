//! Global user mutations.

use super::{replace_in_list, MutationKind, Settled};
use crate::admin::{call, AdminClient};
use crate::error::ErrorKind;
use flagdeck_cache::{CacheKey, CacheResult, KeyPrefix};
use flagdeck_core::{
    CreateUserRequest, EntityType, ProjectId, ProjectUser, UpdateUserRequest, User, UserId,
    Validate,
};

const ENTITY: EntityType = EntityType::User;

impl AdminClient {
    /// A 409 means the username is taken and is reported against that field.
    pub async fn create_user(&self, req: &CreateUserRequest) -> Settled<User> {
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let mut mutation = self.mutation(ENTITY, MutationKind::Create);
        mutation.invalidate_on_settle(CacheKey::Users);
        let mut settled = mutation.commit(call(self.api.create_user(req))).await;
        settled.result = settled.result.map_err(|err| {
            if err.kind() == ErrorKind::Conflict {
                err.with_conflict_field("username", "This username is already taken")
            } else {
                err
            }
        });
        self.finish(ENTITY.noun(), MutationKind::Create, settled)
    }

    pub async fn update_user(&self, id: UserId, req: &UpdateUserRequest) -> Settled<User> {
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let mut mutation = self.mutation(ENTITY, MutationKind::Update);
        let edit = |user: User| User {
            full_name: req.full_name.clone(),
            global_role: req.global_role,
            ..user
        };
        let applied = mutation
            .patch::<User, _>(CacheKey::User(id), edit)
            .and_then(|_| {
                mutation.patch::<Vec<User>, _>(CacheKey::Users, |users| {
                    replace_in_list(users, |u| u.user_id == id, edit)
                })
            });
        if let Err(err) = applied {
            return mutation.abort(err);
        }
        let settled = mutation.commit(call(self.api.update_user(id, req))).await;
        self.finish(ENTITY.noun(), MutationKind::Update, settled)
    }

    /// The user disappears from every project: all member lists are
    /// invalidated, their memberships are evicted and the member counts of
    /// the projects they belonged to are invalidated.
    pub async fn delete_user(&self, id: UserId) -> Settled<()> {
        let key = CacheKey::User(id);
        let mut mutation = self.mutation(ENTITY, MutationKind::Delete);
        if let Err(err) = mutation.capture(key).map(|_| ()) {
            return mutation.abort(err);
        }
        let memberships = match self.memberships_of(id) {
            Ok(memberships) => memberships,
            Err(err) => return mutation.abort(err),
        };
        for project_id in memberships {
            let membership = CacheKey::ProjectUser(project_id, id);
            if let Err(err) = mutation.capture(membership).map(|_| ()) {
                return mutation.abort(err);
            }
            mutation
                .evict_on_success(membership)
                .invalidate_on_settle(CacheKey::Project(project_id));
        }
        mutation
            .evict_on_success(key)
            .invalidate_on_settle(CacheKey::Users)
            .invalidate_prefix_on_settle(KeyPrefix::project_users());
        let settled = mutation.commit(call(self.api.delete_user(id))).await;
        self.finish(ENTITY.noun(), MutationKind::Delete, settled)
    }

    /// Projects whose cached member list or membership detail names `id`.
    fn memberships_of(&self, id: UserId) -> CacheResult<Vec<ProjectId>> {
        let mut projects = Vec::new();
        for key in self.cache.keys(&KeyPrefix::project_users())? {
            let member = match key {
                CacheKey::ProjectUser(_, uid) => uid == id,
                CacheKey::ProjectUsers(_) => self
                    .cache
                    .get::<Vec<ProjectUser>>(&key)?
                    .is_some_and(|list| list.value().iter().any(|m| m.user_id == id)),
                _ => false,
            };
            if let Some(project_id) = key.project_id().filter(|_| member) {
                if !projects.contains(&project_id) {
                    projects.push(project_id);
                }
            }
        }
        Ok(projects)
    }
}
