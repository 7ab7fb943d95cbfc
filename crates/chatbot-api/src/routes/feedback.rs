use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FeedbackRequest {
    /// Score in [-1.0, 1.0] for the latest message of the thread.
    pub feedback: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FeedbackResponse {
    pub message: String,
}

/// Score the latest message of a thread
#[utoipa::path(
    post,
    path = "/threads/{thread_id}/feedback",
    params(
        ("thread_id" = String, Path, description = "Thread ID")
    ),
    request_body = FeedbackRequest,
    responses(
        (status = 200, description = "Feedback stored", body = FeedbackResponse),
        (status = 400, description = "Score out of range or empty thread"),
        (status = 404, description = "Thread not found")
    ),
    tag = "feedback"
)]
pub async fn record_feedback(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<Json<FeedbackResponse>> {
    let recorded = state.manager.record_feedback(&thread_id, req.feedback).await?;
    if !recorded {
        return Err(ApiError::BadRequest(
            "Thread has no message to attach feedback to".to_string(),
        ));
    }

    tracing::info!(thread_id = %thread_id, feedback = req.feedback, "Feedback recorded");
    Ok(Json(FeedbackResponse {
        message: "Feedback recorded".to_string(),
    }))
}
