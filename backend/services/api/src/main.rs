mod error;
mod extractors;
mod rubric;
mod scripts;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use coach_common::types::ServiceInfo;
use coach_config::{init_tracing, AppConfig};
use coach_db::rubric::pg_repository::PgRubricRepository;
use coach_db::rubric::repositories::RubricRepository;
use coach_db::schema::ensure_schema;
use coach_db::scripts::pg_repository::PgScriptRepository;
use coach_db::scripts::repositories::ScriptRepository;
use coach_db::sync::pg_repository::PgSyncLogRepository;
use coach_db::sync::repositories::SyncLogRepository;
use coach_rubric::analyzer::llm::{AnalyzerConfig, LlmAnalyzer};
use coach_rubric::{
    ApprovalMerger, ChangeAnalyzer, SyncSettings, SyncWorkflow, UnconfiguredAnalyzer,
    VersionActivator,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const SERVICE_NAME: &str = "coach-api";

pub type DynRubricRepo = Arc<dyn RubricRepository>;
pub type DynSyncRepo = Arc<dyn SyncLogRepository>;

pub type Workflow = SyncWorkflow<
    DynRubricRepo,
    Arc<dyn ScriptRepository>,
    DynSyncRepo,
    Arc<dyn ChangeAnalyzer>,
>;

#[derive(Clone)]
pub struct AppState {
    pub rubric_repo: DynRubricRepo,
    pub script_repo: Arc<dyn ScriptRepository>,
    pub activator: VersionActivator<DynRubricRepo>,
    pub workflow: Workflow,
    pub merger: ApprovalMerger<DynRubricRepo, DynSyncRepo>,
    pub analyzer_label: String,
    /// Run analysis inside the sync request instead of a spawned task.
    pub sync_inline: bool,
}

impl AppState {
    pub fn new(
        rubric_repo: DynRubricRepo,
        script_repo: Arc<dyn ScriptRepository>,
        sync_repo: DynSyncRepo,
        analyzer: Arc<dyn ChangeAnalyzer>,
        settings: SyncSettings,
        sync_inline: bool,
    ) -> Self {
        Self {
            activator: VersionActivator::new(rubric_repo.clone()),
            merger: ApprovalMerger::new(rubric_repo.clone(), sync_repo.clone()),
            analyzer_label: analyzer.describe(),
            workflow: SyncWorkflow::new(
                rubric_repo.clone(),
                script_repo.clone(),
                sync_repo,
                analyzer,
                settings,
            ),
            rubric_repo,
            script_repo,
            sync_inline,
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo::new(SERVICE_NAME, &state.analyzer_label))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let active_version = match state.rubric_repo.get_active().await {
        Ok(Some(active)) => active.config.version.unwrap_or(0),
        Ok(None) => 0,
        Err(err) => {
            tracing::warn!(error = %err, "metrics could not read active rubric");
            -1
        }
    };

    let body = format!(
        "\
# HELP coach_up Service up indicator\n\
# TYPE coach_up gauge\n\
coach_up 1\n\
# HELP coach_info Service info\n\
# TYPE coach_info gauge\n\
coach_info{{service=\"{SERVICE_NAME}\",version=\"{}\"}} 1\n\
# HELP coach_rubric_active_version Version number of the active rubric (0 when none)\n\
# TYPE coach_rubric_active_version gauge\n\
coach_rubric_active_version {active_version}\n",
        env!("CARGO_PKG_VERSION")
    );

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(extractors::USER_ID_HEADER),
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/metrics", get(metrics))
        .merge(rubric::router())
        .merge(scripts::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    init_tracing("info");

    let config = AppConfig::from_env().expect("failed to load config");
    tracing::info!(service = SERVICE_NAME, "starting");

    let pool = coach_db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");

    if config.auto_migrate {
        ensure_schema(&pool).await.expect("failed to apply schema");
    }

    let analyzer: Arc<dyn ChangeAnalyzer> =
        match AnalyzerConfig::from_env().expect("invalid analyzer config") {
            Some(analyzer_config) => Arc::new(
                LlmAnalyzer::new(analyzer_config).expect("failed to build analyzer client"),
            ),
            None => {
                tracing::warn!("ANALYZER_BASE_URL / ANALYZER_API_KEY not set; syncs will be rejected");
                Arc::new(UnconfiguredAnalyzer)
            }
        };

    let settings = SyncSettings {
        analysis_timeout: config.analysis_timeout(),
        stale_after: config.sync_stale_after(),
    };
    let state = AppState::new(
        Arc::new(PgRubricRepository::new(pool.clone())),
        Arc::new(PgScriptRepository::new(pool.clone())),
        Arc::new(PgSyncLogRepository::new(pool)),
        analyzer,
        settings,
        config.sync_inline,
    );
    tracing::info!(analyzer = %state.analyzer_label, sync_inline = state.sync_inline, "analyzer ready");

    let app = build_router(state);
    let addr: SocketAddr = config.bind_addr().parse().expect("invalid bind address");

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
