// Dealwatch Commands — HTTP Layer
//
// Thin axum handlers: extract, delegate to the engine, serialise. Heavy
// logic lives in `engine`/`sessions`; these modules only translate
// between wire shapes and domain calls, following the corpus's own
// "commands are 1-3 lines" convention (adapted here from Tauri commands
// to axum handlers).
//
// Module layout:
//   agents   — agent CRUD, lifecycle, matches, force-check
//   scan     — properties scan trigger
//   converse — conversational criteria-suggestion endpoint
//   health   — liveness/health endpoint
//   error    — EngineError -> HTTP status mapping, shared by every handler

mod agents;
mod converse;
mod error;
mod health;
mod scan;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/agents", post(agents::create_agent).get(agents::list_agents))
        .route(
            "/api/agents/:id",
            get(agents::get_agent).patch(agents::update_notify).delete(agents::cancel_agent),
        )
        .route("/api/agents/:id/check", post(agents::force_check))
        .route("/api/agents/:id/pause", post(agents::pause_agent))
        .route("/api/agents/:id/resume", post(agents::resume_agent))
        .route("/api/agents/:id/matches", get(agents::list_matches))
        .route("/api/agents/converse", post(converse::converse))
        .route("/api/properties/scan", post(scan::scan))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
