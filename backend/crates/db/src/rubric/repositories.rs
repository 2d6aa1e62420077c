use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::rubric::models::{
    NewRubricConfig, RubricConfig, RubricConfigWithRelations, RubricUpdate, RubricVersionSummary,
};
use crate::sync::models::SyncClaim;
use coach_common::error::CoachResult;

#[async_trait]
pub trait RubricRepository: Send + Sync {
    /// Insert a new draft. With `clone_from_id`, every category (with its
    /// criteria) and red flag of the source is copied under fresh ids.
    /// Fails with `NotFound` when the clone source does not exist.
    async fn create_draft(&self, new: NewRubricConfig) -> CoachResult<RubricConfigWithRelations>;

    async fn get_by_id(&self, id: Uuid) -> CoachResult<Option<RubricConfigWithRelations>>;

    async fn get_active(&self) -> CoachResult<Option<RubricConfigWithRelations>>;

    /// Drafts first, then activated versions, newest version first.
    async fn list_versions(&self) -> CoachResult<Vec<RubricVersionSummary>>;

    /// Apply `update` to a draft. Fails with `InvalidState` for activated configs.
    async fn update_draft(
        &self,
        id: Uuid,
        update: RubricUpdate,
    ) -> CoachResult<RubricConfigWithRelations>;

    /// Delete a draft and its children. Fails with `InvalidState` for activated configs.
    async fn delete_draft(&self, id: Uuid) -> CoachResult<()>;

    /// Id held by the active-config pointer.
    async fn active_id(&self) -> CoachResult<Option<Uuid>>;

    /// Atomically make `draft_id` the active config, provided the pointer
    /// still equals `expected_active` and the row is still a draft.
    /// Assigns `max(version) + 1`. Returns `None` when either condition no
    /// longer holds (the caller lost a race).
    ///
    /// With a `claim`, the sync log transition commits in the same unit:
    /// if the log is no longer in `claim.from` nothing changes and the call
    /// fails with `InvalidState`.
    async fn promote(
        &self,
        draft_id: Uuid,
        expected_active: Option<Uuid>,
        claim: Option<SyncClaim>,
    ) -> CoachResult<Option<RubricConfig>>;
}

#[async_trait]
impl<T: RubricRepository + ?Sized> RubricRepository for Arc<T> {
    async fn create_draft(&self, new: NewRubricConfig) -> CoachResult<RubricConfigWithRelations> {
        (**self).create_draft(new).await
    }

    async fn get_by_id(&self, id: Uuid) -> CoachResult<Option<RubricConfigWithRelations>> {
        (**self).get_by_id(id).await
    }

    async fn get_active(&self) -> CoachResult<Option<RubricConfigWithRelations>> {
        (**self).get_active().await
    }

    async fn list_versions(&self) -> CoachResult<Vec<RubricVersionSummary>> {
        (**self).list_versions().await
    }

    async fn update_draft(
        &self,
        id: Uuid,
        update: RubricUpdate,
    ) -> CoachResult<RubricConfigWithRelations> {
        (**self).update_draft(id, update).await
    }

    async fn delete_draft(&self, id: Uuid) -> CoachResult<()> {
        (**self).delete_draft(id).await
    }

    async fn active_id(&self) -> CoachResult<Option<Uuid>> {
        (**self).active_id().await
    }

    async fn promote(
        &self,
        draft_id: Uuid,
        expected_active: Option<Uuid>,
        claim: Option<SyncClaim>,
    ) -> CoachResult<Option<RubricConfig>> {
        (**self).promote(draft_id, expected_active, claim).await
    }
}
