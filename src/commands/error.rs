// HTTP error mapping (§7, SPEC_FULL §7): the only place an `EngineError`
// becomes a status code. Engine/session code never reasons about HTTP.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::atoms::error::EngineError;

pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::InvalidCriteria(_) => StatusCode::BAD_REQUEST,
            EngineError::TerminalState(_) | EngineError::IllegalTransition(_) | EngineError::Busy(_) => {
                StatusCode::CONFLICT
            }
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            // §7: NoCorpus has no caller-visible error except via `/health`
            // in the normal scheduled-check path, where it's swallowed and
            // counted rather than returned. The one exception is a
            // synchronous force-check (`POST /api/agents/{id}/check`),
            // which must return something to its caller; 503 says "no
            // snapshot ingested yet, try again later" rather than implying
            // a server defect.
            EngineError::NoCorpus => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
