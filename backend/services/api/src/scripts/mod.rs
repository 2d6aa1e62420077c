pub mod handlers;
pub mod requests;
pub mod responses;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/scripts",
            get(handlers::list_scripts).post(handlers::upload_script),
        )
        .route(
            "/scripts/{id}",
            get(handlers::get_script).delete(handlers::delete_script),
        )
        .route("/scripts/{id}/activate", post(handlers::activate_script))
        .route("/scripts/{id}/sync", post(handlers::start_sync))
        .route("/scripts/{id}/sync-logs", get(handlers::list_sync_logs))
        .route("/scripts/sync/{sync_log_id}", get(handlers::get_sync_status))
        .route(
            "/scripts/sync/{sync_log_id}/apply",
            post(handlers::apply_changes),
        )
        .route(
            "/scripts/sync/{sync_log_id}/reject",
            post(handlers::reject_changes),
        )
}
