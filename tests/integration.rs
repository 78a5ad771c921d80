// End-to-end tests driving the real axum router in-process (§8 scenarios
// A-F), the same `tower::ServiceExt::oneshot` harness shape used to test
// HTTP layers without binding a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use dealwatch::atoms::types::{Property, PropertyStatus};
use dealwatch::config::AppConfig;
use dealwatch::engine::corpus::CorpusStore;
use dealwatch::sessions::SessionStore;
use dealwatch::{commands, AppState};

fn sample_property() -> Property {
    Property {
        street_address: "123 Main St".into(),
        city: Some("Springfield".into()),
        postal_code: "92128".into(),
        list_price: Some(900_000),
        bedrooms: Some(3.0),
        bathrooms: Some(2.0),
        square_feet: Some(1800),
        days_on_market: Some(10),
        property_type: Some("single_family".into()),
        status: PropertyStatus::Active,
        deal_quality: None,
        opportunity_score: None,
        enrichment: None,
    }
}

async fn build_router() -> axum::Router {
    let store = SessionStore::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let corpus = CorpusStore::new(dealwatch::engine::corpus::default_backup_path(dir.path()));
    corpus.swap(vec![sample_property()]).unwrap();
    let state = Arc::new(AppState::build(AppConfig::default(), store, corpus));
    commands::router(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn create_agent_body() -> Value {
    json!({
        "client_name": "Jane Investor",
        "client_email": "jane@example.com",
        "criteria": {
            "locations": ["92128"],
            "price_min": 600000,
            "price_max": 1200000,
            "bedrooms_min": 3.0,
            "bathrooms_min": 2.0,
            "property_types": [],
            "deal_quality": [],
            "min_score": 70
        },
        "notification_email": true,
        "notification_sms": false,
        "notification_chat": false
    })
}

#[tokio::test]
async fn scenario_a_create_agent_then_force_check_finds_one_match() {
    let router = build_router().await;

    let response = router
        .clone()
        .oneshot(json_request("POST", "/api/agents", create_agent_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let agent_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "active");

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/agents/{agent_id}/check"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await;
    assert_eq!(summary["new_matches"], 1);
    assert_eq!(summary["price_drops"], 0);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/api/agents/{agent_id}/matches"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let matches = body_json(response).await;
    assert_eq!(matches.as_array().unwrap().len(), 1);
    assert_eq!(matches[0]["match_score"], 90);
}

#[tokio::test]
async fn invalid_criteria_returns_400() {
    let router = build_router().await;
    let mut body = create_agent_body();
    body["criteria"]["locations"] = json!([]);

    let response = router.oneshot(json_request("POST", "/api/agents", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_agent_returns_404() {
    let router = build_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/agents/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scenario_e_cancel_then_force_check_is_conflict() {
    let router = build_router().await;

    let response = router
        .clone()
        .oneshot(json_request("POST", "/api/agents", create_agent_body()))
        .await
        .unwrap();
    let agent_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/agents/{agent_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cancelled = body_json(response).await;
    assert_eq!(cancelled["status"], "cancelled");

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/agents/{agent_id}/check"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn pause_then_resume_round_trips_and_rejects_double_pause() {
    let router = build_router().await;

    let response = router
        .clone()
        .oneshot(json_request("POST", "/api/agents", create_agent_body()))
        .await
        .unwrap();
    let agent_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/agents/{agent_id}/pause"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "paused");

    // Pausing an already-paused agent is an illegal transition.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/agents/{agent_id}/resume"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "active");

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/agents/{agent_id}/resume"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn patch_notify_rejects_unknown_fields_and_applies_known_ones() {
    let router = build_router().await;

    let response = router
        .clone()
        .oneshot(json_request("POST", "/api/agents", create_agent_body()))
        .await
        .unwrap();
    let agent_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/api/agents/{agent_id}"),
            json!({ "sms": true, "favorite_color": "blue" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .oneshot(json_request("PATCH", &format!("/api/agents/{agent_id}"), json!({ "sms": true })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let agent = body_json(response).await;
    assert_eq!(agent["notify"]["sms"], true);
    assert_eq!(agent["notify"]["email"], true);
}

#[tokio::test]
async fn scan_endpoint_checks_every_active_agent() {
    let router = build_router().await;
    router
        .clone()
        .oneshot(json_request("POST", "/api/agents", create_agent_body()))
        .await
        .unwrap();

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/properties/scan")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["agents_checked"], 1);
}

#[tokio::test]
async fn health_endpoint_reports_corpus_and_agent_counts() {
    let router = build_router().await;
    router
        .clone()
        .oneshot(json_request("POST", "/api/agents", create_agent_body()))
        .await
        .unwrap();

    let response = router
        .oneshot(Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_agents"], 1);
    assert!(!body["corpus_timestamp"].is_null());
}

#[tokio::test]
async fn converse_endpoint_extracts_suggested_criteria_without_side_effects() {
    let router = build_router().await;
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/agents/converse",
            json!({ "message": "Looking for a 3 bed 2 bath under 900000 in 92128" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["agent_configured"], false);
    assert_eq!(body["suggested_criteria"]["locations"][0], "92128");

    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/agents")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let agents = body_json(response).await;
    assert!(agents.as_array().unwrap().is_empty());
}
