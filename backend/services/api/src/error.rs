use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coach_common::error::CoachError;

pub struct ApiError(pub CoachError);

impl From<CoachError> for ApiError {
    fn from(err: CoachError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            CoachError::NotFound(_) => StatusCode::NOT_FOUND,
            CoachError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CoachError::InvalidState(_) | CoachError::Validation(_) | CoachError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            CoachError::Analysis(_) => StatusCode::BAD_GATEWAY,
            CoachError::Config(_) | CoachError::Database(_) | CoachError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = serde_json::json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}
