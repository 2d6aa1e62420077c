use coach_db::rubric::models::RubricConfigWithRelations;
use coach_db::scripts::models::SalesScript;
use coach_db::sync::models::{RubricSyncLog, SyncStatus};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ScriptResponse {
    pub data: SalesScript,
}

#[derive(Debug, Serialize)]
pub struct ScriptListResponse {
    pub data: Vec<SalesScript>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SyncStarted {
    pub sync_log_id: Uuid,
    pub status: SyncStatus,
}

#[derive(Debug, Serialize)]
pub struct SyncStartedResponse {
    pub data: SyncStarted,
}

#[derive(Debug, Serialize)]
pub struct SyncLogResponse {
    pub data: RubricSyncLog,
}

#[derive(Debug, Serialize)]
pub struct SyncLogListResponse {
    pub data: Vec<RubricSyncLog>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct AppliedResponse {
    pub data: RubricConfigWithRelations,
}
