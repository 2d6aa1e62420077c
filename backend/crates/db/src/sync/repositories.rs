use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::sync::models::{RubricSyncLog, SyncStatus, SyncTransition};
use coach_common::error::CoachResult;

#[async_trait]
pub trait SyncLogRepository: Send + Sync {
    /// Insert a log in `pending`.
    async fn create(
        &self,
        script_id: Uuid,
        rubric_config_id: Option<Uuid>,
    ) -> CoachResult<RubricSyncLog>;

    async fn get(&self, id: Uuid) -> CoachResult<Option<RubricSyncLog>>;

    /// Newest first.
    async fn list_for_script(&self, script_id: Uuid) -> CoachResult<Vec<RubricSyncLog>>;

    /// Apply `transition` only if the log is currently in `from`.
    /// Returns `None` when the log is missing or has already moved on.
    async fn transition(
        &self,
        id: Uuid,
        from: SyncStatus,
        transition: SyncTransition,
    ) -> CoachResult<Option<RubricSyncLog>>;
}

#[async_trait]
impl<T: SyncLogRepository + ?Sized> SyncLogRepository for Arc<T> {
    async fn create(
        &self,
        script_id: Uuid,
        rubric_config_id: Option<Uuid>,
    ) -> CoachResult<RubricSyncLog> {
        (**self).create(script_id, rubric_config_id).await
    }

    async fn get(&self, id: Uuid) -> CoachResult<Option<RubricSyncLog>> {
        (**self).get(id).await
    }

    async fn list_for_script(&self, script_id: Uuid) -> CoachResult<Vec<RubricSyncLog>> {
        (**self).list_for_script(script_id).await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SyncStatus,
        transition: SyncTransition,
    ) -> CoachResult<Option<RubricSyncLog>> {
        (**self).transition(id, from, transition).await
    }
}
