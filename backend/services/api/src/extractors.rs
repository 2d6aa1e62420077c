use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub const USER_ID_HEADER: &str = "x-user-id";

/// The reviewer acting on a sync proposal, from the `X-User-Id` header.
pub struct Actor(pub String);

#[derive(Debug)]
pub struct ActorRejection(String);

impl IntoResponse for ActorRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0, "code": "invalid_input" });
        (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ActorRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ActorRejection("missing X-User-Id header".to_string()))?;

        let value = header
            .to_str()
            .map_err(|_| ActorRejection("invalid X-User-Id header value".to_string()))?
            .trim();

        if value.is_empty() {
            return Err(ActorRejection("empty X-User-Id header".to_string()));
        }

        Ok(Actor(value.to_string()))
    }
}
