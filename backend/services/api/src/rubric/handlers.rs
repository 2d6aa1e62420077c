use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use coach_common::error::CoachError;
use coach_db::rubric::models::{
    NewRubricConfig, RubricConfigWithRelations, RubricContent, RubricUpdate,
};
use coach_db::rubric::repositories::RubricRepository;
use coach_rubric::validation;
use uuid::Uuid;

use crate::error::ApiError;
use crate::rubric::requests::{CreateRubricRequest, UpdateRubricRequest};
use crate::rubric::responses::{ActiveRubricResponse, RubricResponse, VersionListResponse};
use crate::AppState;

fn with_weights(data: RubricConfigWithRelations) -> RubricResponse {
    let weights = validation::validate(&data.categories);
    RubricResponse { data, weights }
}

async fn load(state: &AppState, id: Uuid) -> Result<RubricConfigWithRelations, ApiError> {
    state
        .rubric_repo
        .get_by_id(id)
        .await?
        .ok_or_else(|| CoachError::NotFound(format!("rubric config not found: {id}")).into())
}

pub async fn get_active_rubric(
    State(state): State<AppState>,
) -> Result<Json<ActiveRubricResponse>, ApiError> {
    let data = state.rubric_repo.get_active().await?;
    Ok(Json(ActiveRubricResponse { data }))
}

pub async fn list_versions(
    State(state): State<AppState>,
) -> Result<Json<VersionListResponse>, ApiError> {
    let data = state.rubric_repo.list_versions().await?;
    let count = data.len();
    Ok(Json(VersionListResponse { data, count }))
}

pub async fn get_rubric(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RubricResponse>, ApiError> {
    Ok(Json(with_weights(load(&state, id).await?)))
}

pub async fn create_rubric(
    State(state): State<AppState>,
    Json(body): Json<CreateRubricRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.name.trim().is_empty() {
        return Err(CoachError::InvalidInput("name must not be empty".to_string()).into());
    }

    let draft = state
        .rubric_repo
        .create_draft(NewRubricConfig {
            name: body.name.trim().to_string(),
            description: body.description,
            clone_from_id: body.clone_from_id,
        })
        .await?;

    if body.is_draft == Some(false) {
        if let Err(err) = state.activator.activate(draft.config.id).await {
            if let Err(cleanup) = state.rubric_repo.delete_draft(draft.config.id).await {
                tracing::error!(config_id = %draft.config.id, error = %cleanup, "failed to discard draft");
            }
            return Err(err.into());
        }
        let activated = load(&state, draft.config.id).await?;
        return Ok((StatusCode::CREATED, Json(with_weights(activated))));
    }

    Ok((StatusCode::CREATED, Json(with_weights(draft))))
}

pub async fn update_rubric(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateRubricRequest>,
) -> Result<Json<RubricResponse>, ApiError> {
    // Lifecycle first: an activated config is immutable whatever the body says.
    let current = load(&state, id).await?;
    if !current.config.is_draft {
        return Err(CoachError::InvalidState(format!(
            "rubric config {id} has been activated and can no longer be edited"
        ))
        .into());
    }

    if body.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(CoachError::InvalidInput("name must not be empty".to_string()).into());
    }

    let replaces_categories = body.categories.is_some();
    let replaces_red_flags = body.red_flags.is_some();
    let mut content = RubricContent {
        categories: body.categories.unwrap_or_default(),
        red_flags: body.red_flags.unwrap_or_default(),
    };
    content.normalize();
    validation::check_content(&content)?;

    let update = RubricUpdate {
        name: body.name.map(|n| n.trim().to_string()),
        description: body.description,
        categories: replaces_categories.then_some(content.categories),
        red_flags: replaces_red_flags.then_some(content.red_flags),
    };
    let updated = state.rubric_repo.update_draft(id, update).await?;
    Ok(Json(with_weights(updated)))
}

pub async fn activate_rubric(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RubricResponse>, ApiError> {
    state.activator.activate(id).await?;
    Ok(Json(with_weights(load(&state, id).await?)))
}

pub async fn delete_rubric(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.rubric_repo.delete_draft(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
