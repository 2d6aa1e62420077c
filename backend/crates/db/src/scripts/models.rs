use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coach_common::error::{CoachError, CoachResult};

/// An uploaded sales script. Versions count up per `product_type`
/// (e.g. `aca`, `limited_medical`, `life_insurance`); at most one version
/// per product type is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalesScript {
    pub id: Uuid,
    pub product_type: String,
    pub name: String,
    pub version: i32,
    pub content: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSalesScript {
    pub product_type: String,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScriptFilter {
    pub product_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ScriptFilter {
    pub const DEFAULT_LIMIT: i64 = 50;

    /// `(limit, offset)` with defaults applied. Negative values are rejected.
    pub fn page(&self) -> CoachResult<(i64, i64)> {
        let limit = self.limit.unwrap_or(Self::DEFAULT_LIMIT);
        let offset = self.offset.unwrap_or(0);
        if limit < 0 || offset < 0 {
            return Err(CoachError::InvalidInput(format!(
                "limit and offset must not be negative (limit={limit}, offset={offset})"
            )));
        }
        Ok((limit, offset))
    }
}
