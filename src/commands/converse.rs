use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::AppState;
use crate::engine::criteria_extractor::ConversationReply;

#[derive(Debug, Deserialize)]
pub struct ConverseRequest {
    pub message: String,
}

/// `POST /api/agents/converse` — extracts suggested criteria from a
/// free-form message. No side effects; agent creation stays a separate
/// `POST /api/agents` call (§6.1 design note).
pub async fn converse(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConverseRequest>,
) -> Json<ConversationReply> {
    Json(state.criteria_extractor.reply(&body.message).await)
}
