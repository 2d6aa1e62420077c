use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, QueryBuilder, Row};
use uuid::Uuid;

use crate::scripts::models::{NewSalesScript, SalesScript, ScriptFilter};
use crate::scripts::repositories::ScriptRepository;
use coach_common::error::{CoachError, CoachResult};

const SCRIPT_COLUMNS: &str =
    "id, product_type, name, version, content, is_active, created_at, updated_at";

#[derive(Clone)]
pub struct PgScriptRepository {
    pool: PgPool,
}

impl PgScriptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> SalesScript {
        SalesScript {
            id: row.get("id"),
            product_type: row.get("product_type"),
            name: row.get("name"),
            version: row.get("version"),
            content: row.get("content"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl ScriptRepository for PgScriptRepository {
    async fn upload(&self, script: NewSalesScript) -> CoachResult<SalesScript> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachError::Database(e.to_string()))?;

        // Serialise version assignment per product type.
        sqlx::query("select pg_advisory_xact_lock(hashtext($1))")
            .bind(&script.product_type)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoachError::Database(e.to_string()))?;

        let now = Utc::now();
        let row = sqlx::query(&format!(
            "insert into sales_scripts (id, product_type, name, version, content, is_active, created_at, updated_at)
             values ($1, $2, $3,
                     (select coalesce(max(version), 0) + 1 from sales_scripts where product_type = $2),
                     $4, false, $5, $5)
             returning {SCRIPT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&script.product_type)
        .bind(&script.name)
        .bind(&script.content)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| CoachError::Database(e.to_string()))?;

        Ok(Self::map_row(&row))
    }

    async fn get_by_id(&self, id: Uuid) -> CoachResult<Option<SalesScript>> {
        let row = sqlx::query(&format!(
            "select {SCRIPT_COLUMNS} from sales_scripts where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;

        Ok(row.as_ref().map(Self::map_row))
    }

    async fn get_active(&self, product_type: &str) -> CoachResult<Option<SalesScript>> {
        let row = sqlx::query(&format!(
            "select {SCRIPT_COLUMNS} from sales_scripts where product_type = $1 and is_active"
        ))
        .bind(product_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;

        Ok(row.as_ref().map(Self::map_row))
    }

    async fn list(&self, filter: ScriptFilter) -> CoachResult<Vec<SalesScript>> {
        let (limit, offset) = filter.page()?;
        let mut qb = QueryBuilder::new(format!(
            "select {SCRIPT_COLUMNS} from sales_scripts where 1=1"
        ));

        if let Some(product_type) = filter.product_type {
            qb.push(" and product_type = ").push_bind(product_type);
        }

        qb.push(" order by product_type, version desc");
        qb.push(" limit ").push_bind(limit);
        qb.push(" offset ").push_bind(offset);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoachError::Database(e.to_string()))?;

        Ok(rows.iter().map(Self::map_row).collect())
    }

    async fn activate(&self, id: Uuid) -> CoachResult<SalesScript> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoachError::Database(e.to_string()))?;

        let row = sqlx::query("select product_type from sales_scripts where id = $1 for update")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| CoachError::Database(e.to_string()))?;

        let product_type: String = match row {
            Some(r) => r.get("product_type"),
            None => return Err(CoachError::NotFound(format!("script not found: {id}"))),
        };

        let now = Utc::now();
        sqlx::query(
            "update sales_scripts set is_active = false, updated_at = $1
             where product_type = $2 and is_active and id <> $3",
        )
        .bind(now)
        .bind(&product_type)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;

        let row = sqlx::query(&format!(
            "update sales_scripts set is_active = true, updated_at = $1 where id = $2
             returning {SCRIPT_COLUMNS}"
        ))
        .bind(now)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| CoachError::Database(e.to_string()))?;

        tracing::info!(script_id = %id, product_type = %product_type, "script activated");
        Ok(Self::map_row(&row))
    }

    async fn delete(&self, id: Uuid) -> CoachResult<()> {
        let result = sqlx::query("delete from sales_scripts where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoachError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CoachError::NotFound(format!("script not found: {id}")));
        }
        Ok(())
    }
}
