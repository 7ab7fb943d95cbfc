pub mod config;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod streaming;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::handlers::generate;
use crate::middleware::logging;
use crate::routes::{feedback, health, threads};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        threads::create_thread,
        threads::get_thread,
        threads::list_messages,
        threads::delete_thread,
        generate::generate,
        feedback::record_feedback,
    ),
    components(schemas(
        health::HealthResponse,
        threads::CreateThreadRequest,
        threads::CreateThreadResponse,
        threads::ThreadResponse,
        threads::MessagesResponse,
        threads::DeleteThreadResponse,
        generate::GenerateRequest,
        generate::PromptMessage,
        feedback::FeedbackRequest,
        feedback::FeedbackResponse,
        streaming::ChainResponse,
        streaming::ChainResponseChoice,
        streaming::ChunkMessage,
    )),
    tags(
        (name = "health", description = "Service status"),
        (name = "threads", description = "Thread management"),
        (name = "generate", description = "Streamed replies"),
        (name = "feedback", description = "Reply scoring"),
    )
)]
pub struct ApiDoc;

pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(health::health_check))
        // Threads
        .route("/threads", post(threads::create_thread))
        .route(
            "/threads/:thread_id",
            get(threads::get_thread).delete(threads::delete_thread),
        )
        .route("/threads/:thread_id/messages", get(threads::list_messages))
        // Inference
        .route("/threads/:thread_id/generate", post(generate::generate))
        // Feedback
        .route("/threads/:thread_id/feedback", post(feedback::record_feedback));

    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .merge(api_routes)
        .layer(axum_middleware::from_fn(logging::log_request))
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/api/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    if !config.cors.enabled {
        return CorsLayer::permissive();
    }

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    if config.cors.origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let parsed_origins: Vec<axum::http::HeaderValue> = config
            .cors
            .origins
            .iter()
            .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok())
            .collect();

        cors.allow_origin(parsed_origins)
    }
}
