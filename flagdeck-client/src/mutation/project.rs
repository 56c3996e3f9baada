//! Project mutations.

use super::{project_children, replace_in_list, MutationKind, Settled};
use crate::admin::{call, AdminClient};
use chrono::Utc;
use flagdeck_cache::CacheKey;
use flagdeck_core::{
    CreateProjectRequest, EntityType, Project, ProjectDetail, ProjectId, RegenerateApiKeyResponse,
    UpdateProjectRequest, Validate,
};

const ENTITY: EntityType = EntityType::Project;

impl AdminClient {
    pub async fn create_project(&self, req: &CreateProjectRequest) -> Settled<ProjectDetail> {
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let mut mutation = self.mutation(ENTITY, MutationKind::Create);
        mutation.invalidate_on_settle(CacheKey::Projects);
        let settled = mutation.commit(call(self.api.create_project(req))).await;
        self.finish(ENTITY.noun(), MutationKind::Create, settled)
    }

    /// Name and description are merged into the cached detail and list entry.
    pub async fn update_project(
        &self,
        id: ProjectId,
        req: &UpdateProjectRequest,
    ) -> Settled<ProjectDetail> {
        if let Err(err) = req.validate() {
            return Settled::rejected(err);
        }
        let settled = {
            let mut mutation = self.mutation(ENTITY, MutationKind::Update);
            let name = req.name.clone();
            let description = req.description.clone();
            let applied = mutation
                .patch::<ProjectDetail, _>(CacheKey::Project(id), |mut detail| {
                    detail.project.name = name.clone();
                    detail.project.description = description.clone();
                    detail
                })
                .and_then(|_| {
                    mutation.patch::<Vec<Project>, _>(CacheKey::Projects, |projects| {
                        replace_in_list(projects, |p| p.id == id, |p| Project {
                            name: name.clone(),
                            description: description.clone(),
                            ..p
                        })
                    })
                });
            if let Err(err) = applied {
                return mutation.abort(err);
            }
            mutation.commit(call(self.api.update_project(id, req))).await
        };
        self.finish(ENTITY.noun(), MutationKind::Update, settled)
    }

    /// Deleting a project cascades server-side, so every key scoped to it is
    /// evicted, along with the details of its scopes, flags and members.
    pub async fn delete_project(&self, id: ProjectId) -> Settled<()> {
        let mut mutation = self.mutation(ENTITY, MutationKind::Delete);
        let children = match project_children(&self.cache, id) {
            Ok(children) => children,
            Err(err) => return mutation.abort(err),
        };
        let project_keys = [
            CacheKey::Project(id),
            CacheKey::MyPermissions(id),
            CacheKey::Scopes(id),
            CacheKey::FeatureFlags(id),
            CacheKey::ProjectUsers(id),
            CacheKey::AvailableUsers(id),
        ];
        let child_keys = children
            .scopes
            .iter()
            .map(|sid| CacheKey::Scope(*sid))
            .chain(children.flags.iter().map(|fid| CacheKey::FeatureFlag(*fid)))
            .chain(children.members.iter().map(|uid| CacheKey::ProjectUser(id, *uid)));
        for key in project_keys.into_iter().chain(child_keys) {
            if let Err(err) = mutation.capture(key).map(|_| ()) {
                return mutation.abort(err);
            }
            mutation.evict_on_success(key);
        }
        mutation.invalidate_on_settle(CacheKey::Projects);
        let settled = mutation.commit(call(self.api.delete_project(id))).await;
        self.finish(ENTITY.noun(), MutationKind::Delete, settled)
    }

    pub async fn archive_project(&self, id: ProjectId) -> Settled<()> {
        self.set_archived(id, true).await
    }

    pub async fn unarchive_project(&self, id: ProjectId) -> Settled<()> {
        self.set_archived(id, false).await
    }

    /// Archived projects stay in every list; only the flag flips.
    async fn set_archived(&self, id: ProjectId, archived: bool) -> Settled<()> {
        let kind = if archived {
            MutationKind::Archive
        } else {
            MutationKind::Unarchive
        };
        let mut mutation = self.mutation(ENTITY, kind);
        let now = Utc::now();
        let applied = mutation
            .patch::<ProjectDetail, _>(CacheKey::Project(id), |mut detail| {
                detail.project.is_archived = archived;
                detail.project.updated_at = now;
                detail
            })
            .and_then(|_| {
                mutation.patch::<Vec<Project>, _>(CacheKey::Projects, |projects| {
                    replace_in_list(projects, |p| p.id == id, |p| Project {
                        is_archived: archived,
                        updated_at: now,
                        ..p
                    })
                })
            });
        if let Err(err) = applied {
            return mutation.abort(err);
        }

        let request = async {
            if archived {
                call(self.api.archive_project(id)).await
            } else {
                call(self.api.unarchive_project(id)).await
            }
        };
        let settled = mutation.commit(request).await;
        self.finish(ENTITY.noun(), kind, settled)
    }

    /// The new key is written into the cached detail as soon as the server
    /// returns it.
    pub async fn regenerate_api_key(&self, id: ProjectId) -> Settled<RegenerateApiKeyResponse> {
        let key = CacheKey::Project(id);
        let mut mutation = self.mutation(ENTITY, MutationKind::Regenerate);
        if let Err(err) = mutation.capture(key).map(|_| ()) {
            return mutation.abort(err);
        }
        let settled = mutation
            .commit_with(
                call(self.api.regenerate_api_key(id)),
                |cache, response: &RegenerateApiKeyResponse| {
                    cache
                        .update::<ProjectDetail, _>(&key, |mut detail| {
                            detail.api_key = Some(response.api_key.clone());
                            detail.project.updated_at = response.regenerated_at;
                            detail
                        })
                        .map(|_| ())
                },
            )
            .await;
        self.finish("API key", MutationKind::Regenerate, settled)
    }
}
