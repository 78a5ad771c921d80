use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::AppState;

use super::error::ApiResult;

/// `POST /api/properties/scan` — fan out force-checks over every active
/// agent against the current corpus (§6.1).
pub async fn scan(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let checked = state.manager.scan_all().await?;
    Ok(Json(json!({ "agents_checked": checked })))
}
