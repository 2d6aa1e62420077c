use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::sync::models::{RubricSyncLog, SyncStatus, SyncTransition};
use crate::sync::proposal::ProposedChanges;
use crate::sync::repositories::SyncLogRepository;
use coach_common::error::{CoachError, CoachResult};

const LOG_COLUMNS: &str = "id, script_id, rubric_config_id, status, changes_proposed, changes_approved, \
     changes_rejected, error_message, approved_by, approved_at, rejected_by, applied_at, \
     applied_config_id, created_at, updated_at";

#[derive(Clone)]
pub struct PgSyncLogRepository {
    pool: PgPool,
}

impl PgSyncLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn changes_column(row: &PgRow, column: &str) -> CoachResult<Option<ProposedChanges>> {
        let raw: Option<serde_json::Value> = row.get(column);
        raw.map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoachError::Internal(format!("corrupt {column}: {e}")))
    }

    fn changes_value(changes: &Option<ProposedChanges>) -> CoachResult<Option<serde_json::Value>> {
        changes
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CoachError::Internal(e.to_string()))
    }

    fn map_row(row: &PgRow) -> CoachResult<RubricSyncLog> {
        let status_raw: String = row.get("status");
        let status = SyncStatus::from_str(&status_raw).map_err(CoachError::Internal)?;

        Ok(RubricSyncLog {
            id: row.get("id"),
            script_id: row.get("script_id"),
            rubric_config_id: row.get("rubric_config_id"),
            status,
            changes_proposed: Self::changes_column(row, "changes_proposed")?,
            changes_approved: Self::changes_column(row, "changes_approved")?,
            changes_rejected: Self::changes_column(row, "changes_rejected")?,
            error_message: row.get("error_message"),
            approved_by: row.get("approved_by"),
            approved_at: row.get("approved_at"),
            rejected_by: row.get("rejected_by"),
            applied_at: row.get("applied_at"),
            applied_config_id: row.get("applied_config_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Conditional update of one log inside a caller's transaction. The row
    /// stays locked until that transaction ends.
    pub(crate) async fn transition_in(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        from: SyncStatus,
        transition: SyncTransition,
    ) -> CoachResult<Option<RubricSyncLog>> {
        let row = sqlx::query(&format!(
            "select {LOG_COLUMNS} from rubric_sync_logs where id = $1 and status = $2 for update"
        ))
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;

        let mut log = match row {
            Some(r) => Self::map_row(&r)?,
            None => return Ok(None),
        };

        transition.apply_to(&mut log, Utc::now());

        let row = sqlx::query(&format!(
            "update rubric_sync_logs
             set status = $1, changes_proposed = $2, changes_approved = $3, changes_rejected = $4,
                 error_message = $5, approved_by = $6, approved_at = $7, rejected_by = $8,
                 applied_at = $9, applied_config_id = $10, updated_at = $11
             where id = $12
             returning {LOG_COLUMNS}"
        ))
        .bind(log.status.as_str())
        .bind(Self::changes_value(&log.changes_proposed)?)
        .bind(Self::changes_value(&log.changes_approved)?)
        .bind(Self::changes_value(&log.changes_rejected)?)
        .bind(&log.error_message)
        .bind(&log.approved_by)
        .bind(log.approved_at)
        .bind(&log.rejected_by)
        .bind(log.applied_at)
        .bind(log.applied_config_id)
        .bind(log.updated_at)
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;

        Ok(Some(Self::map_row(&row)?))
    }
}

#[async_trait]
impl SyncLogRepository for PgSyncLogRepository {
    async fn create(
        &self,
        script_id: Uuid,
        rubric_config_id: Option<Uuid>,
    ) -> CoachResult<RubricSyncLog> {
        let row = sqlx::query(&format!(
            "insert into rubric_sync_logs (id, script_id, rubric_config_id, status, created_at, updated_at)
             values ($1, $2, $3, 'pending', $4, $4)
             returning {LOG_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(script_id)
        .bind(rubric_config_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;

        Self::map_row(&row)
    }

    async fn get(&self, id: Uuid) -> CoachResult<Option<RubricSyncLog>> {
        let row = sqlx::query(&format!(
            "select {LOG_COLUMNS} from rubric_sync_logs where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_for_script(&self, script_id: Uuid) -> CoachResult<Vec<RubricSyncLog>> {
        let rows = sqlx::query(&format!(
            "select {LOG_COLUMNS} from rubric_sync_logs
             where script_id = $1
             order by created_at desc"
        ))
        .bind(script_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SyncStatus,
        transition: SyncTransition,
    ) -> CoachResult<Option<RubricSyncLog>> {
        transition.check_from(from)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachError::Database(e.to_string()))?;

        let updated = Self::transition_in(&mut tx, id, from, transition).await?;
        if updated.is_none() {
            return Ok(None);
        }

        tx.commit()
            .await
            .map_err(|e| CoachError::Database(e.to_string()))?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use crate::schema::ensure_schema;

    async fn test_repo() -> Option<PgSyncLogRepository> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        ensure_schema(&pool).await.ok()?;
        Some(PgSyncLogRepository::new(pool))
    }

    #[tokio::test]
    async fn create_starts_pending() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let log = repo.create(Uuid::new_v4(), None).await.expect("create");
        assert_eq!(log.status, SyncStatus::Pending);
        assert!(log.changes_proposed.is_none());
    }

    #[tokio::test]
    async fn transition_requires_expected_status() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let log = repo.create(Uuid::new_v4(), None).await.expect("create");

        let analyzing = repo
            .transition(log.id, SyncStatus::Pending, SyncTransition::BeginAnalysis)
            .await
            .expect("transition")
            .expect("should move");
        assert_eq!(analyzing.status, SyncStatus::Analyzing);

        // A second begin from pending no longer matches.
        let again = repo
            .transition(log.id, SyncStatus::Pending, SyncTransition::BeginAnalysis)
            .await
            .expect("transition");
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn proposal_survives_jsonb_round_trip() {
        let repo = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let script_id = Uuid::new_v4();
        let log = repo.create(script_id, None).await.expect("create");
        repo.transition(log.id, SyncStatus::Pending, SyncTransition::BeginAnalysis)
            .await
            .expect("begin");

        let proposal: ProposedChanges = serde_json::from_value(serde_json::json!({
            "category_changes": [{
                "slug": "rapport",
                "change_type": "remove",
                "reason": "dropped from script",
                "confidence": 0.7
            }]
        }))
        .unwrap();

        let saved = repo
            .transition(
                log.id,
                SyncStatus::Analyzing,
                SyncTransition::Proposed(proposal.clone()),
            )
            .await
            .expect("propose")
            .expect("should move");
        assert_eq!(saved.changes_proposed, Some(proposal));

        let listed = repo.list_for_script(script_id).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, SyncStatus::PendingApproval);
    }
}
