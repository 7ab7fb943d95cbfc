use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: HashMap<String, String>,
}

/// Health check endpoint
///
/// Reports the cache backend and whether the datastore answers.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let datastore_up = state.manager.datastore().ping().await;

    let mut services = HashMap::new();
    services.insert(
        "cache".to_string(),
        state.manager.cache().backend_name().to_string(),
    );
    services.insert(
        "datastore".to_string(),
        if datastore_up { "connected" } else { "disconnected" }.to_string(),
    );
    services.insert("generator".to_string(), state.generator.name().to_string());

    Json(HealthResponse {
        status: if datastore_up { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    })
}
