use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::atoms::types::{Agent, AgentId, AgentStatus, Criteria, DealQuality, Match, NotificationPrefs};
use crate::AppState;

use super::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CriteriaInput {
    pub locations: Vec<String>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub bedrooms_min: Option<f64>,
    pub bathrooms_min: Option<f64>,
    #[serde(default)]
    pub property_types: Vec<String>,
    #[serde(default)]
    pub deal_quality: Vec<DealQuality>,
    pub min_score: Option<u8>,
    pub investment_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub criteria: CriteriaInput,
    #[serde(default)]
    pub notification_email: bool,
    #[serde(default)]
    pub notification_sms: bool,
    #[serde(default)]
    pub notification_chat: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListAgentsQuery {
    pub status: Option<String>,
}

/// `POST /api/agents` — create agent (§6.1). `400` on invalid criteria.
pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAgentRequest>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    let criteria = Criteria {
        id: uuid::Uuid::new_v4().to_string(),
        locations: body.criteria.locations,
        price_min: body.criteria.price_min,
        price_max: body.criteria.price_max,
        bedrooms_min: body.criteria.bedrooms_min,
        bathrooms_min: body.criteria.bathrooms_min,
        property_types: body.criteria.property_types,
        deal_quality: body.criteria.deal_quality,
        min_score: body.criteria.min_score.unwrap_or(crate::atoms::types::DEFAULT_MIN_SCORE),
        investment_type: body.criteria.investment_type,
    };
    let notify = NotificationPrefs {
        email: body.notification_email,
        sms: body.notification_sms,
        chat: body.notification_chat,
    };
    let agent = state.manager.create_agent(body.client_name, body.client_email, body.client_phone, criteria, notify)?;
    Ok((StatusCode::CREATED, Json(agent)))
}

/// `GET /api/agents` — list all agents, optionally filtered by `status`.
pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListAgentsQuery>,
) -> ApiResult<Json<Vec<Agent>>> {
    let status = query.status.as_deref().and_then(AgentStatus::parse);
    let agents = state.manager.list_agents(status)?;
    Ok(Json(agents))
}

/// `GET /api/agents/{id}` — fetch one. `404` if absent.
pub async fn get_agent(State(state): State<Arc<AppState>>, Path(id): Path<AgentId>) -> ApiResult<Json<Agent>> {
    Ok(Json(state.manager.get_agent(&id)?))
}

/// `DELETE /api/agents/{id}` — soft-deletes (cancels).
pub async fn cancel_agent(State(state): State<Arc<AppState>>, Path(id): Path<AgentId>) -> ApiResult<Json<Agent>> {
    Ok(Json(state.manager.cancel(&id)?))
}

/// `POST /api/agents/{id}/check` — force-check, blocks until completion.
pub async fn force_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AgentId>,
) -> ApiResult<Json<crate::engine::manager::CheckSummary>> {
    Ok(Json(state.manager.force_check(&id).await?))
}

pub async fn pause_agent(State(state): State<Arc<AppState>>, Path(id): Path<AgentId>) -> ApiResult<Json<Agent>> {
    Ok(Json(state.manager.pause(&id)?))
}

pub async fn resume_agent(State(state): State<Arc<AppState>>, Path(id): Path<AgentId>) -> ApiResult<Json<Agent>> {
    Ok(Json(state.manager.resume(&id)?))
}

/// `GET /api/agents/{id}/matches` — list matches for an agent.
pub async fn list_matches(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AgentId>,
) -> ApiResult<Json<Vec<Match>>> {
    Ok(Json(state.manager.list_matches(&id)?))
}

/// `PATCH /api/agents/{id}` — partial update of notification preferences
/// only. `400` on any other field, so the body is validated by hand
/// against an explicit allowlist rather than trusting `serde`'s default
/// extra-field tolerance.
pub async fn update_notify(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AgentId>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    const ALLOWED: &[&str] = &["email", "sms", "chat"];
    let Some(obj) = body.as_object() else {
        return bad_request("PATCH body must be a JSON object");
    };
    for key in obj.keys() {
        if !ALLOWED.contains(&key.as_str()) {
            return bad_request(&format!("unexpected field {key:?}, only {ALLOWED:?} are allowed"));
        }
    }

    let current = match state.manager.get_agent(&id) {
        Ok(agent) => agent,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let mut notify = current.notify;
    for (key, value) in obj {
        let Some(flag) = value.as_bool() else {
            return bad_request(&format!("{key:?} must be a boolean"));
        };
        match key.as_str() {
            "email" => notify.email = flag,
            "sms" => notify.sms = flag,
            "chat" => notify.chat = flag,
            _ => unreachable!("checked against ALLOWED above"),
        }
    }

    match state.manager.update_notify(&id, notify) {
        Ok(agent) => Json(agent).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}
