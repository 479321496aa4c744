use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use decisiontrace::api::{api_router, AppContext};
use decisiontrace::config::{self, AppConfig};
use decisiontrace::db::SqliteDecisionStore;
use decisiontrace::pipeline::generation::GenerationClient;
use decisiontrace::pipeline::openrouter::OpenRouterCaller;
use decisiontrace::pipeline::orchestrator::DecisionPipeline;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("DecisionTrace starting v{}", config::APP_VERSION);

    let app_config = AppConfig::from_env();
    if app_config.api_key.is_empty() {
        tracing::warn!("OPENROUTER_API_KEY is not set; model calls will be rejected upstream");
    }

    let store = Arc::new(
        SqliteDecisionStore::open(&app_config.database_path)
            .expect("Failed to open decision database"),
    );
    tracing::info!(path = %app_config.database_path.display(), "database ready");

    let caller = Arc::new(OpenRouterCaller::new(&app_config));
    let client = GenerationClient::new(caller, app_config.generation.clone());
    let pipeline = DecisionPipeline::new(client, store.clone());
    let ctx = AppContext::new(pipeline, store);

    let router = api_router(ctx, &app_config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(app_config.bind_addr)
        .await
        .expect("Failed to bind listen address");
    tracing::info!(addr = %app_config.bind_addr, "listening");

    axum::serve(listener, router)
        .await
        .expect("Server terminated unexpectedly");
}
