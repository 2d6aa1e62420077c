pub mod handlers;
pub mod requests;
pub mod responses;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/rubric",
            get(handlers::get_active_rubric).post(handlers::create_rubric),
        )
        .route("/rubric/versions", get(handlers::list_versions))
        .route(
            "/rubric/{id}",
            get(handlers::get_rubric)
                .put(handlers::update_rubric)
                .delete(handlers::delete_rubric),
        )
        .route("/rubric/{id}/activate", post(handlers::activate_rubric))
}
