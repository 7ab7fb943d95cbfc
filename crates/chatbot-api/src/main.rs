use std::sync::Arc;

use chatbot_api::{
    build_router,
    config::Config,
    generation::{OpenAiGenerator, ReplyGenerator},
    state::AppState,
};
use chatbot_persist::ThreadManagerBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config);

    tracing::info!("Starting chatbot API server");
    tracing::info!("Config loaded: {}:{}", config.server.host, config.server.port);

    if config.llm_api_key.is_empty() {
        tracing::warn!("LLM_API_KEY is not set; requests to the model will likely be rejected");
    }
    let generator: Arc<dyn ReplyGenerator> =
        Arc::new(OpenAiGenerator::new(config.llm.clone(), &config.llm_api_key)?);
    tracing::info!(model = %config.llm.model, base_url = %config.llm.base_url, "LLM client ready");

    let manager = ThreadManagerBuilder::new()
        .cache_config(config.cache.clone())
        .datastore_config(config.datastore.clone())
        .build()
        .await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, manager, generator));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);
    tracing::info!("API docs: http://{}/api/docs", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }
}
