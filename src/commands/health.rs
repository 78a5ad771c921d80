use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::AppState;

/// `GET /health` — `{status, corpus_timestamp, active_agents, degraded_agents}` (§6.1).
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let corpus_timestamp = state.corpus.current().map(|s| s.taken_at);
    let (active_agents, degraded_agents) = state.store.health_counts().unwrap_or((0, 0));

    Json(json!({
        "status": "ok",
        "corpus_timestamp": corpus_timestamp,
        "active_agents": active_agents,
        "degraded_agents": degraded_agents,
    }))
}
