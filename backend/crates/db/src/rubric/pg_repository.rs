use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::rubric::models::{
    NewRubricConfig, RubricCategory, RubricConfig, RubricConfigWithRelations, RubricContent,
    RubricRedFlag, RubricUpdate, RubricVersionSummary, ScoringCriterion, Severity, ThresholdType,
};
use crate::rubric::repositories::RubricRepository;
use crate::sync::models::SyncClaim;
use crate::sync::pg_repository::PgSyncLogRepository;
use coach_common::error::{CoachError, CoachResult};

const CONFIG_COLUMNS: &str =
    "id, name, description, version, is_active, is_draft, created_at, updated_at";

fn db_err(e: sqlx::Error) -> CoachError {
    CoachError::Database(e.to_string())
}

#[derive(Clone)]
pub struct PgRubricRepository {
    pool: PgPool,
}

impl PgRubricRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_config_row(row: &PgRow) -> RubricConfig {
        RubricConfig {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            version: row.get("version"),
            is_active: row.get("is_active"),
            is_draft: row.get("is_draft"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn map_category_row(row: &PgRow) -> RubricCategory {
        RubricCategory {
            id: row.get("id"),
            config_id: row.get("config_id"),
            name: row.get("name"),
            slug: row.get("slug"),
            description: row.get("description"),
            weight: row.get("weight"),
            sort_order: row.get("sort_order"),
            is_enabled: row.get("is_enabled"),
            criteria: Vec::new(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn map_red_flag_row(row: &PgRow) -> CoachResult<RubricRedFlag> {
        let severity_raw: String = row.get("severity");
        let threshold_raw: String = row.get("threshold_type");

        Ok(RubricRedFlag {
            id: row.get("id"),
            config_id: row.get("config_id"),
            flag_key: row.get("flag_key"),
            display_name: row.get("display_name"),
            description: row.get("description"),
            severity: Severity::from_str(&severity_raw).map_err(CoachError::Internal)?,
            threshold_type: ThresholdType::from_str(&threshold_raw)
                .map_err(CoachError::Internal)?,
            threshold_value: row.get("threshold_value"),
            is_enabled: row.get("is_enabled"),
            sort_order: row.get("sort_order"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn load_relations(&self, config: RubricConfig) -> CoachResult<RubricConfigWithRelations> {
        let category_rows = sqlx::query(
            "select id, config_id, name, slug, description, weight, sort_order, is_enabled, created_at, updated_at
             from rubric_categories
             where config_id = $1
             order by sort_order, name",
        )
        .bind(config.id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut categories: Vec<RubricCategory> =
            category_rows.iter().map(Self::map_category_row).collect();

        let category_ids: Vec<Uuid> = categories.iter().map(|c| c.id).collect();
        let criteria_rows = sqlx::query(
            "select id, category_id, score, description
             from rubric_scoring_criteria
             where category_id = any($1)
             order by score",
        )
        .bind(&category_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut by_category: HashMap<Uuid, Vec<ScoringCriterion>> = HashMap::new();
        for row in &criteria_rows {
            let criterion = ScoringCriterion {
                id: row.get("id"),
                category_id: row.get("category_id"),
                score: row.get("score"),
                description: row.get("description"),
            };
            by_category
                .entry(criterion.category_id)
                .or_default()
                .push(criterion);
        }
        for category in &mut categories {
            category.criteria = by_category.remove(&category.id).unwrap_or_default();
        }

        let flag_rows = sqlx::query(
            "select id, config_id, flag_key, display_name, description, severity, threshold_type,
                    threshold_value, is_enabled, sort_order, created_at, updated_at
             from rubric_red_flags
             where config_id = $1
             order by sort_order, flag_key",
        )
        .bind(config.id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let red_flags = flag_rows
            .iter()
            .map(Self::map_red_flag_row)
            .collect::<CoachResult<Vec<_>>>()?;

        Ok(RubricConfigWithRelations {
            config,
            categories,
            red_flags,
        })
    }

    async fn fetch_config(&self, id: Uuid) -> CoachResult<Option<RubricConfig>> {
        let row = sqlx::query(&format!(
            "select {CONFIG_COLUMNS} from rubric_configs where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.as_ref().map(Self::map_config_row))
    }

    async fn require(&self, id: Uuid) -> CoachResult<RubricConfigWithRelations> {
        let config = self
            .fetch_config(id)
            .await?
            .ok_or_else(|| CoachError::NotFound(format!("rubric config not found: {id}")))?;
        self.load_relations(config).await
    }

    /// Lock a config row and return its `is_draft` flag.
    async fn lock_draft_flag(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> CoachResult<bool> {
        let row = sqlx::query("select is_draft from rubric_configs where id = $1 for update")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;

        match row {
            Some(r) => Ok(r.get("is_draft")),
            None => Err(CoachError::NotFound(format!("rubric config not found: {id}"))),
        }
    }

    async fn insert_categories(
        tx: &mut Transaction<'_, Postgres>,
        categories: &[RubricCategory],
    ) -> CoachResult<()> {
        for category in categories {
            sqlx::query(
                "insert into rubric_categories
                 (id, config_id, name, slug, description, weight, sort_order, is_enabled, created_at, updated_at)
                 values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)",
            )
            .bind(category.id)
            .bind(category.config_id)
            .bind(&category.name)
            .bind(&category.slug)
            .bind(&category.description)
            .bind(category.weight)
            .bind(category.sort_order)
            .bind(category.is_enabled)
            .bind(category.created_at)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;

            for criterion in &category.criteria {
                sqlx::query(
                    "insert into rubric_scoring_criteria (id, category_id, score, description)
                     values ($1, $2, $3, $4)",
                )
                .bind(criterion.id)
                .bind(criterion.category_id)
                .bind(criterion.score)
                .bind(&criterion.description)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
            }
        }
        Ok(())
    }

    async fn insert_red_flags(
        tx: &mut Transaction<'_, Postgres>,
        flags: &[RubricRedFlag],
    ) -> CoachResult<()> {
        for flag in flags {
            sqlx::query(
                "insert into rubric_red_flags
                 (id, config_id, flag_key, display_name, description, severity, threshold_type,
                  threshold_value, is_enabled, sort_order, created_at, updated_at)
                 values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)",
            )
            .bind(flag.id)
            .bind(flag.config_id)
            .bind(&flag.flag_key)
            .bind(&flag.display_name)
            .bind(&flag.description)
            .bind(flag.severity.as_str())
            .bind(flag.threshold_type.as_str())
            .bind(flag.threshold_value)
            .bind(flag.is_enabled)
            .bind(flag.sort_order)
            .bind(flag.created_at)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RubricRepository for PgRubricRepository {
    async fn create_draft(&self, new: NewRubricConfig) -> CoachResult<RubricConfigWithRelations> {
        let source: Option<RubricContent> = match new.clone_from_id {
            Some(source_id) => Some(self.require(source_id).await?.content()),
            None => None,
        };

        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "insert into rubric_configs (id, name, description, version, is_active, is_draft, created_at, updated_at)
             values ($1, $2, $3, null, false, true, $4, $4)",
        )
        .bind(id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if let Some(content) = source {
            let (categories, red_flags) = content.instantiate(id, now);
            Self::insert_categories(&mut tx, &categories).await?;
            Self::insert_red_flags(&mut tx, &red_flags).await?;
        }

        tx.commit().await.map_err(db_err)?;

        tracing::info!(config_id = %id, cloned_from = ?new.clone_from_id, "rubric draft created");
        self.require(id).await
    }

    async fn get_by_id(&self, id: Uuid) -> CoachResult<Option<RubricConfigWithRelations>> {
        match self.fetch_config(id).await? {
            Some(config) => Ok(Some(self.load_relations(config).await?)),
            None => Ok(None),
        }
    }

    async fn get_active(&self) -> CoachResult<Option<RubricConfigWithRelations>> {
        match self.active_id().await? {
            Some(id) => self.get_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn list_versions(&self) -> CoachResult<Vec<RubricVersionSummary>> {
        let rows = sqlx::query(
            "select c.id, c.name, c.version, c.is_active, c.is_draft, c.created_at, c.updated_at,
                    (select count(*) from rubric_categories rc where rc.config_id = c.id) as category_count,
                    (select count(*) from rubric_red_flags rf where rf.config_id = c.id) as red_flag_count
             from rubric_configs c
             order by c.version desc nulls first, c.created_at desc",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|row| RubricVersionSummary {
                id: row.get("id"),
                name: row.get("name"),
                version: row.get("version"),
                is_active: row.get("is_active"),
                is_draft: row.get("is_draft"),
                category_count: row.get("category_count"),
                red_flag_count: row.get("red_flag_count"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    async fn update_draft(
        &self,
        id: Uuid,
        update: RubricUpdate,
    ) -> CoachResult<RubricConfigWithRelations> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if !Self::lock_draft_flag(&mut tx, id).await? {
            return Err(CoachError::InvalidState(format!(
                "rubric config {id} has been activated and can no longer be edited"
            )));
        }

        let now = Utc::now();
        sqlx::query(
            "update rubric_configs
             set name = coalesce($1, name), description = coalesce($2, description), updated_at = $3
             where id = $4",
        )
        .bind(&update.name)
        .bind(&update.description)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let content = RubricContent {
            categories: update.categories.clone().unwrap_or_default(),
            red_flags: update.red_flags.clone().unwrap_or_default(),
        };
        let (categories, red_flags) = content.instantiate(id, now);

        if update.categories.is_some() {
            sqlx::query("delete from rubric_categories where config_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            Self::insert_categories(&mut tx, &categories).await?;
        }

        if update.red_flags.is_some() {
            sqlx::query("delete from rubric_red_flags where config_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            Self::insert_red_flags(&mut tx, &red_flags).await?;
        }

        tx.commit().await.map_err(db_err)?;

        tracing::info!(config_id = %id, "rubric draft updated");
        self.require(id).await
    }

    async fn delete_draft(&self, id: Uuid) -> CoachResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if !Self::lock_draft_flag(&mut tx, id).await? {
            return Err(CoachError::InvalidState(format!(
                "rubric config {id} has been activated; only drafts can be deleted"
            )));
        }

        sqlx::query("delete from rubric_configs where id = $1 and is_draft")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        tracing::info!(config_id = %id, "rubric draft deleted");
        Ok(())
    }

    async fn active_id(&self) -> CoachResult<Option<Uuid>> {
        let row = sqlx::query("select config_id from rubric_active_pointer where id")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.and_then(|r| r.get::<Option<Uuid>, _>("config_id")))
    }

    async fn promote(
        &self,
        draft_id: Uuid,
        expected_active: Option<Uuid>,
        claim: Option<SyncClaim>,
    ) -> CoachResult<Option<RubricConfig>> {
        if let Some(claim) = &claim {
            claim.transition.check_from(claim.from)?;
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Serialises every activation on the single pointer row.
        let pointer = sqlx::query("select config_id from rubric_active_pointer where id for update")
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoachError::Internal("rubric_active_pointer row is missing".into()))?;
        let current: Option<Uuid> = pointer.get("config_id");

        if current != expected_active {
            tx.rollback().await.map_err(db_err)?;
            return Ok(None);
        }

        if !Self::lock_draft_flag(&mut tx, draft_id).await? {
            tx.rollback().await.map_err(db_err)?;
            return Ok(None);
        }

        if let Some(claim) = claim {
            let moved_on = claim.moved_on();
            let claimed =
                PgSyncLogRepository::transition_in(&mut tx, claim.sync_log_id, claim.from, claim.transition)
                    .await?;
            if claimed.is_none() {
                tx.rollback().await.map_err(db_err)?;
                return Err(moved_on);
            }
        }

        let next_version: i32 = sqlx::query("select coalesce(max(version), 0) + 1 as next from rubric_configs")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?
            .get("next");

        let now = Utc::now();

        sqlx::query(
            "update rubric_configs set is_active = false, updated_at = $1
             where is_active and id <> $2",
        )
        .bind(now)
        .bind(draft_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query(&format!(
            "update rubric_configs
             set is_draft = false, is_active = true, version = $1, updated_at = $2
             where id = $3
             returning {CONFIG_COLUMNS}"
        ))
        .bind(next_version)
        .bind(now)
        .bind(draft_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("update rubric_active_pointer set config_id = $1, updated_at = $2 where id")
            .bind(draft_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(Some(Self::map_config_row(&row)))
    }
}
