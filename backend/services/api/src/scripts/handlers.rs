use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use coach_common::error::CoachError;
use coach_db::scripts::models::{NewSalesScript, ScriptFilter};
use coach_db::scripts::repositories::ScriptRepository;
use coach_db::sync::models::SyncStatus;
use coach_rubric::ApprovedChangeKeys;
use uuid::Uuid;

use crate::error::ApiError;
use crate::extractors::Actor;
use crate::scripts::requests::{ApplyChangesRequest, ListScriptsQuery, UploadScriptRequest};
use crate::scripts::responses::{
    AppliedResponse, ScriptListResponse, ScriptResponse, SyncLogListResponse, SyncLogResponse,
    SyncStarted, SyncStartedResponse,
};
use crate::AppState;

pub async fn upload_script(
    State(state): State<AppState>,
    Json(body): Json<UploadScriptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product_type = body.product_type.trim().to_lowercase();
    if product_type.is_empty() {
        return Err(CoachError::InvalidInput("product_type must not be empty".to_string()).into());
    }
    if body.name.trim().is_empty() {
        return Err(CoachError::InvalidInput("name must not be empty".to_string()).into());
    }

    let script = state
        .script_repo
        .upload(NewSalesScript {
            product_type,
            name: body.name.trim().to_string(),
            content: body.content,
        })
        .await?;
    tracing::info!(script_id = %script.id, product_type = %script.product_type, version = script.version, "script uploaded");

    Ok((StatusCode::CREATED, Json(ScriptResponse { data: script })))
}

pub async fn list_scripts(
    State(state): State<AppState>,
    Query(query): Query<ListScriptsQuery>,
) -> Result<Json<ScriptListResponse>, ApiError> {
    let active_only = query.active;
    let filter = ScriptFilter::from(query);

    let data = if active_only {
        let product_type = filter
            .product_type
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CoachError::InvalidInput("active=true requires product_type".to_string()))?;
        state
            .script_repo
            .get_active(product_type)
            .await?
            .into_iter()
            .collect()
    } else {
        state.script_repo.list(filter).await?
    };
    let count = data.len();
    Ok(Json(ScriptListResponse { data, count }))
}

pub async fn get_script(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScriptResponse>, ApiError> {
    let script = state
        .script_repo
        .get_by_id(id)
        .await?
        .ok_or_else(|| CoachError::NotFound(format!("script not found: {id}")))?;
    Ok(Json(ScriptResponse { data: script }))
}

pub async fn activate_script(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScriptResponse>, ApiError> {
    let script = state.script_repo.activate(id).await?;
    Ok(Json(ScriptResponse { data: script }))
}

pub async fn delete_script(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.script_repo.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_sync(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut log = state.workflow.start(id).await?;

    if log.status == SyncStatus::Analyzing {
        if state.sync_inline {
            log = state.workflow.run_analysis(log.id).await?;
        } else {
            let workflow = state.workflow.clone();
            let sync_log_id = log.id;
            tokio::spawn(async move {
                if let Err(err) = workflow.run_analysis(sync_log_id).await {
                    tracing::error!(%sync_log_id, error = %err, "background analysis failed");
                }
            });
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SyncStartedResponse {
            data: SyncStarted {
                sync_log_id: log.id,
                status: log.status,
            },
        }),
    ))
}

pub async fn list_sync_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncLogListResponse>, ApiError> {
    let data = state.workflow.list_for_script(id).await?;
    let count = data.len();
    Ok(Json(SyncLogListResponse { data, count }))
}

pub async fn get_sync_status(
    State(state): State<AppState>,
    Path(sync_log_id): Path<Uuid>,
) -> Result<Json<SyncLogResponse>, ApiError> {
    let log = state.workflow.get_status(sync_log_id).await?;
    Ok(Json(SyncLogResponse { data: log }))
}

pub async fn apply_changes(
    State(state): State<AppState>,
    Path(sync_log_id): Path<Uuid>,
    Actor(user): Actor,
    Json(body): Json<ApplyChangesRequest>,
) -> Result<Json<AppliedResponse>, ApiError> {
    let keys = ApprovedChangeKeys::from(body);
    let config = state.merger.apply(sync_log_id, &keys, &user).await?;
    Ok(Json(AppliedResponse { data: config }))
}

pub async fn reject_changes(
    State(state): State<AppState>,
    Path(sync_log_id): Path<Uuid>,
    Actor(user): Actor,
) -> Result<Json<SyncLogResponse>, ApiError> {
    let log = state.merger.reject(sync_log_id, &user).await?;
    Ok(Json(SyncLogResponse { data: log }))
}
