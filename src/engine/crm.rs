// Dealwatch Engine: CRM Sync Worker (§4.5 / C5)
//
// `CrmClient` is a small trait so tests can swap in a recording fake
// without a live network dependency — the same provider-trait seam the
// corpus uses for its pluggable LLM backends (`AnyProvider`/`AiProvider`),
// retargeted here at CRM delivery instead of chat completion.
//
// The retry/backoff policy itself does not live in an in-process sleep
// loop: each `deliver_one` call makes exactly one attempt and reschedules
// by writing `next_attempt_at` on the durable outbox row, so a crash
// between attempts loses nothing and the retry loop is just "the next
// poll tick picks up rows that are due."

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::atoms::constants::CRM_REQUEST_TIMEOUT;
use crate::atoms::error::{EngineError, EngineResult};
use crate::config::CrmConfig;
use crate::sessions::outbox::OutboxEntry;
use crate::sessions::SessionStore;

use super::retry::{self, CircuitBreakers};

/// Response shape the worker needs from a delivery attempt — status code
/// plus any `Retry-After` hint, regardless of transport.
#[derive(Debug, Clone)]
pub struct CrmResponse {
    pub status: u16,
    pub retry_after_secs: Option<u64>,
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn deliver(&self, opportunity: &Value) -> EngineResult<CrmResponse>;
}

/// reqwest-backed `CrmClient`. POSTs the transformed opportunity JSON to
/// `{base_url}/opportunities` with a bearer token if one is configured.
pub struct HttpCrmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCrmClient {
    pub fn new(base_url: String, api_key: Option<String>) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(CRM_REQUEST_TIMEOUT)
            .build()
            .map_err(EngineError::Network)?;
        Ok(Self { http, base_url, api_key })
    }
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn deliver(&self, opportunity: &Value) -> EngineResult<CrmResponse> {
        let url = format!("{}/opportunities", self.base_url.trim_end_matches('/'));
        let mut req = self.http.post(url).json(opportunity);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(retry::parse_retry_after);
        Ok(CrmResponse { status, retry_after_secs })
    }
}

/// Build the external opportunity JSON from a stored outbox payload and
/// the configured field mapping (§6.2). Fields with no configured mapping
/// are dropped with a warning rather than failing the event.
pub fn transform_payload(raw: &Value, config: &CrmConfig) -> Value {
    let kind = raw.get("kind").and_then(Value::as_str).unwrap_or("new_match");
    let score = raw.get("score").and_then(Value::as_u64).unwrap_or(0);
    let address = raw
        .get("street_address")
        .and_then(Value::as_str)
        .unwrap_or("unknown address");
    let list_price = raw.get("list_price").and_then(Value::as_i64);
    let sqft = raw.get("square_feet").and_then(Value::as_i64);
    let dom = raw.get("days_on_market").and_then(Value::as_i64);
    let deal_quality = raw.get("deal_quality").and_then(Value::as_str);
    let reasons: Vec<String> = raw
        .get("reasons")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let mut note = format!("Score {score}. {}.", reasons.join("; "));
    if kind == "price_drop" {
        let old = raw.get("old_price").and_then(Value::as_i64).unwrap_or(0);
        let new = raw.get("new_price").and_then(Value::as_i64).unwrap_or(0);
        note.push_str(&format!(" Price dropped from {old} to {new}."));
    }

    let mut internal: Vec<(&str, Value)> = vec![
        ("deal_score", json!(score)),
        ("property_address", json!(address)),
    ];
    if let Some(p) = list_price {
        internal.push(("list_price", json!(p)));
    }
    if let (Some(p), Some(s)) = (list_price, sqft) {
        if s > 0 {
            internal.push(("price_per_sqft", json!(((p as f64 / s as f64) * 100.0).round() / 100.0)));
        }
    }
    if let Some(d) = dom {
        internal.push(("days_on_market", json!(d)));
    }
    if let Some(dq) = deal_quality {
        internal.push(("deal_quality", json!(dq)));
    }

    let mut fields = serde_json::Map::new();
    for (internal_name, value) in internal {
        match config.field_map.get(internal_name) {
            Some(external_key) => {
                fields.insert(external_key.clone(), value);
            }
            None => warn!("[crm-sync] no field mapping configured for {internal_name}, dropping"),
        }
    }

    json!({
        "name": format!("{address} — score {score}"),
        "value": list_price,
        "pipeline_id": config.pipeline_id,
        "stage_id": config.default_stage_id,
        "fields": Value::Object(fields),
        "note": note,
    })
}

/// Stand-in `CrmClient` for a deployment with no `crm.base_url`
/// configured. Every delivery "fails" with a non-2xx, non-4xx status, so
/// due entries retry on the normal backoff schedule and eventually
/// dead-letter rather than the worker treating an unconfigured CRM as a
/// hard error.
pub struct NoopCrmClient;

#[async_trait]
impl CrmClient for NoopCrmClient {
    async fn deliver(&self, _opportunity: &Value) -> EngineResult<CrmResponse> {
        Ok(CrmResponse { status: 0, retry_after_secs: None })
    }
}

/// Polls the durable outbox and delivers due entries, one outstanding
/// attempt per agent at a time (FIFO per agent), different agents
/// delivered concurrently (§4.5, §5).
pub struct CrmSyncWorker {
    store: Arc<SessionStore>,
    client: Arc<dyn CrmClient>,
    config: CrmConfig,
    circuit_breakers: CircuitBreakers,
    concurrency: Arc<Semaphore>,
}

impl CrmSyncWorker {
    pub fn new(store: Arc<SessionStore>, client: Arc<dyn CrmClient>, config: CrmConfig) -> Self {
        Self {
            store,
            client,
            config,
            circuit_breakers: CircuitBreakers::new(),
            concurrency: Arc::new(Semaphore::new(8)),
        }
    }

    /// One drain pass over every pending, due outbox row. Returns the
    /// number of entries attempted.
    pub async fn drain_once(self: &Arc<Self>) -> usize {
        let due = match self.store.due_outbox_entries(Utc::now()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("[crm-sync] failed to load outbox: {e}");
                return 0;
            }
        };
        if due.is_empty() {
            return 0;
        }

        // `due_outbox_entries` is already ordered by (agent_id, created_at),
        // so grouping preserves each agent's FIFO order as long as that
        // agent's own entries are processed sequentially.
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<OutboxEntry>> = HashMap::new();
        let total = due.len();
        for entry in due {
            groups
                .entry(entry.agent_id.clone())
                .or_insert_with(|| {
                    order.push(entry.agent_id.clone());
                    Vec::new()
                })
                .push(entry);
        }

        let mut handles = Vec::with_capacity(order.len());
        for agent_id in order {
            let entries = groups.remove(&agent_id).unwrap_or_default();
            let worker = Arc::clone(self);
            let permit = Arc::clone(&self.concurrency);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                for entry in entries {
                    worker.deliver_one(entry).await;
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        total
    }

    async fn deliver_one(&self, entry: OutboxEntry) {
        if let Err(msg) = self.circuit_breakers.check(&entry.agent_id) {
            debug!("[crm-sync] {msg}; leaving event {} pending", entry.id);
            return;
        }

        let opportunity = match serde_json::from_str::<Value>(&entry.payload_json) {
            Ok(raw) => transform_payload(&raw, &self.config),
            Err(e) => {
                let _ = self
                    .store
                    .mark_outbox_dead(&entry.id, &format!("corrupt payload: {e}"));
                return;
            }
        };

        let outcome = self.client.deliver(&opportunity).await;
        let (status, retry_after, transport_err) = match &outcome {
            Ok(r) => (r.status, r.retry_after_secs, None),
            Err(e) => (0u16, None, Some(e.to_string())),
        };

        if (200..300).contains(&status) {
            let _ = self.store.mark_outbox_sent(&entry.id);
            if let Some(match_id) = &entry.match_id {
                let _ = self
                    .store
                    .update_delivery_status(match_id, crate::atoms::types::DeliveryStatus::Sent);
            }
            self.circuit_breakers.record_success(&entry.agent_id);
            return;
        }

        // 401/403 fail the event permanently and surface health-degraded.
        if status == 401 || status == 403 {
            let _ = self
                .store
                .mark_outbox_dead(&entry.id, &format!("permanent CRM auth failure: {status}"));
            let _ = self.store.mark_agent_degraded(&entry.agent_id);
            self.circuit_breakers.record_failure(&entry.agent_id);
            return;
        }

        if transport_err.is_none() && retry::is_permanent_status(status) {
            let _ = self
                .store
                .mark_outbox_dead(&entry.id, &format!("permanent CRM failure: {status}"));
            return;
        }

        self.circuit_breakers.record_failure(&entry.agent_id);

        if entry.attempts + 1 >= retry::MAX_RETRIES {
            let reason = transport_err.unwrap_or_else(|| format!("status {status}"));
            let _ = self
                .store
                .mark_outbox_dead(&entry.id, &format!("exhausted retries: {reason}"));
            return;
        }

        let was_rate_limited = status == 429;
        let delay = retry::backoff_delay(entry.attempts, retry_after, was_rate_limited);
        let next_attempt_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(60));
        let reason = transport_err.unwrap_or_else(|| format!("status {status}"));
        let _ = self.store.mark_outbox_retry(&entry.id, next_attempt_at, &reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeCrmClient {
        responses: Mutex<Vec<CrmResponse>>,
        calls: Mutex<Vec<Value>>,
    }

    impl FakeCrmClient {
        fn new(responses: Vec<CrmResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CrmClient for FakeCrmClient {
        async fn deliver(&self, opportunity: &Value) -> EngineResult<CrmResponse> {
            self.calls.lock().push(opportunity.clone());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(CrmResponse { status: 500, retry_after_secs: None })
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    fn sample_payload() -> String {
        json!({
            "kind": "new_match",
            "match_id": "m1",
            "agent_id": "agent-1",
            "property_key": "123 MAIN ST|92128",
            "score": 90,
            "reasons": ["exact postal match 92128", "within budget"],
            "street_address": "123 Main St",
            "list_price": 900_000,
            "square_feet": 1800,
            "days_on_market": 10,
            "deal_quality": null,
        })
        .to_string()
    }

    #[test]
    fn transform_maps_known_fields_and_drops_unmapped() {
        let mut config = CrmConfig::default();
        config.field_map.remove("price_per_sqft");
        let raw: Value = serde_json::from_str(&sample_payload()).unwrap();
        let opportunity = transform_payload(&raw, &config);
        let fields = opportunity.get("fields").unwrap().as_object().unwrap();
        assert!(fields.contains_key("dealscore"));
        assert!(fields.contains_key("propertyaddress"));
        assert!(!fields.contains_key("price_per_sqft"));
        assert_eq!(opportunity.get("value").unwrap(), &json!(900_000));
    }

    #[tokio::test]
    async fn successful_delivery_marks_sent() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        store
            .enqueue_outbox(
                &"agent-1".to_string(),
                None,
                crate::sessions::outbox::OutboxEventKind::NewMatch,
                &sample_payload(),
            )
            .unwrap();
        let client: Arc<dyn CrmClient> = Arc::new(FakeCrmClient::new(vec![CrmResponse {
            status: 201,
            retry_after_secs: None,
        }]));
        let worker = Arc::new(CrmSyncWorker::new(store.clone(), client, CrmConfig::default()));
        let attempted = worker.drain_once().await;
        assert_eq!(attempted, 1);

        let due = store.due_outbox_entries(Utc::now()).unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn successful_delivery_marks_linked_match_sent() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let outcome = crate::atoms::types::NewMatchOutcome {
            property_key: "123 MAIN ST|92128".into(),
            score: 90,
            reasons: vec!["exact postal match 92128".into()],
            property: crate::atoms::types::Property {
                street_address: "123 Main St".into(),
                city: None,
                postal_code: "92128".into(),
                list_price: Some(900_000),
                bedrooms: Some(3.0),
                bathrooms: Some(2.0),
                square_feet: Some(1800),
                days_on_market: Some(10),
                property_type: None,
                status: crate::atoms::types::PropertyStatus::Active,
                deal_quality: None,
                opportunity_score: None,
                enrichment: None,
            },
        };
        let inserted_match = store.insert_match(&"agent-1".to_string(), &outcome).unwrap();
        store
            .enqueue_outbox(
                &"agent-1".to_string(),
                Some(&inserted_match.id),
                crate::sessions::outbox::OutboxEventKind::NewMatch,
                &sample_payload(),
            )
            .unwrap();
        let client: Arc<dyn CrmClient> = Arc::new(FakeCrmClient::new(vec![CrmResponse {
            status: 201,
            retry_after_secs: None,
        }]));
        let worker = Arc::new(CrmSyncWorker::new(store.clone(), client, CrmConfig::default()));
        worker.drain_once().await;

        let fetched = store.get_match(&inserted_match.id).unwrap();
        assert_eq!(fetched.delivery_status, crate::atoms::types::DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn retryable_failure_reschedules_without_marking_dead() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let entry = store
            .enqueue_outbox(
                &"agent-1".to_string(),
                None,
                crate::sessions::outbox::OutboxEventKind::NewMatch,
                &sample_payload(),
            )
            .unwrap();
        let client: Arc<dyn CrmClient> = Arc::new(FakeCrmClient::new(vec![CrmResponse {
            status: 503,
            retry_after_secs: None,
        }]));
        let worker = Arc::new(CrmSyncWorker::new(store.clone(), client, CrmConfig::default()));
        worker.drain_once().await;

        let fetched = store.get_outbox_entry(&entry.id).unwrap();
        assert_eq!(fetched.attempts, 1);
        assert_eq!(fetched.status, crate::sessions::outbox::OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn permanent_failure_marks_dead_without_retry() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let entry = store
            .enqueue_outbox(
                &"agent-1".to_string(),
                None,
                crate::sessions::outbox::OutboxEventKind::NewMatch,
                &sample_payload(),
            )
            .unwrap();
        let client: Arc<dyn CrmClient> = Arc::new(FakeCrmClient::new(vec![CrmResponse {
            status: 400,
            retry_after_secs: None,
        }]));
        let worker = Arc::new(CrmSyncWorker::new(store.clone(), client, CrmConfig::default()));
        worker.drain_once().await;

        let fetched = store.get_outbox_entry(&entry.id).unwrap();
        assert_eq!(fetched.status, crate::sessions::outbox::OutboxStatus::Dead);
    }

    #[tokio::test]
    async fn auth_failure_marks_dead_and_degrades_agent() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let client_row = crate::sessions::clients::new_client("Jane".into(), None, None);
        store.create_client(&client_row).unwrap();
        let criteria = crate::atoms::types::Criteria {
            id: "crit-x".into(),
            locations: vec!["92128".into()],
            price_min: None,
            price_max: None,
            bedrooms_min: None,
            bathrooms_min: None,
            property_types: vec![],
            deal_quality: vec![],
            min_score: 70,
            investment_type: None,
        };
        store.create_criteria(&criteria).unwrap();
        let agent = crate::atoms::types::Agent {
            id: "agent-1".into(),
            client_id: client_row.id,
            criteria_id: criteria.id,
            status: crate::atoms::types::AgentStatus::Active,
            created_at: Utc::now(),
            last_check_at: None,
            next_check_at: None,
            check_count: 0,
            match_count: 0,
            notify: Default::default(),
            health: Default::default(),
        };
        store.create_agent(&agent).unwrap();

        store
            .enqueue_outbox(
                &"agent-1".to_string(),
                None,
                crate::sessions::outbox::OutboxEventKind::NewMatch,
                &sample_payload(),
            )
            .unwrap();
        let client: Arc<dyn CrmClient> = Arc::new(FakeCrmClient::new(vec![CrmResponse {
            status: 401,
            retry_after_secs: None,
        }]));
        let worker = Arc::new(CrmSyncWorker::new(store.clone(), client, CrmConfig::default()));
        worker.drain_once().await;

        let fetched_agent = store.get_agent(&"agent-1".to_string()).unwrap();
        assert!(fetched_agent.health.degraded);
    }
}
