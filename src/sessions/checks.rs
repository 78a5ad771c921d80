// Transactional persistence for a completed property check (§4.4 steps
// 5-7: "persist matches, enqueue CRM events, and update agent counters as
// a single transaction over the state store").
//
// `SessionStore::conn` is a single non-reentrant mutex, so the per-concern
// methods in `matches`/`outbox`/`agents` cannot be composed here — each of
// them locks it independently. Instead this module locks once and inlines
// the equivalent SQL inside one `rusqlite::Transaction`, committed or
// rolled back as a unit.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::{json, Value};

use crate::atoms::error::EngineResult;
use crate::atoms::types::{AgentId, MatchEvent};

use super::outbox::OutboxEventKind;
use super::SessionStore;

/// Outcome of persisting one check's match events.
pub struct PersistedCheck {
    pub new_matches: u64,
    pub price_drops: u64,
}

impl SessionStore {
    /// Persist every `MatchEvent` from one check plus the agent's updated
    /// counters/health/next_check_at, all inside one transaction. `forced`
    /// controls whether `next_check_at` is recomputed or left as-is (§4.4:
    /// a forced check must not disturb the regular cadence).
    pub fn persist_check_outcomes(
        &self,
        agent_id: &AgentId,
        checked_at: DateTime<Utc>,
        next_check_at: Option<DateTime<Utc>>,
        events: &[MatchEvent],
    ) -> EngineResult<PersistedCheck> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut new_matches = 0u64;
        let mut price_drops = 0u64;

        for event in events {
            match event {
                MatchEvent::New(m) => {
                    let match_id = uuid::Uuid::new_v4().to_string();
                    let reasons_json = serde_json::to_string(&m.reasons)?;
                    let property_json = serde_json::to_string(&m.property)?;
                    tx.execute(
                        "INSERT INTO matches (id, agent_id, property_key, match_score, reasons_json,
                                               property_snapshot_json, captured_price, matched_at, delivery_status)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'new')",
                        params![
                            match_id,
                            agent_id,
                            m.property_key,
                            m.score as i64,
                            reasons_json,
                            property_json,
                            m.property.list_price,
                            checked_at,
                        ],
                    )?;

                    let address = serde_json::to_value(&m.property)?
                        .get("street_address")
                        .cloned()
                        .unwrap_or(Value::Null);
                    let deal_quality = serde_json::to_value(&m.property)?
                        .get("deal_quality")
                        .cloned()
                        .unwrap_or(Value::Null);
                    let payload = json!({
                        "kind": "new_match",
                        "match_id": match_id,
                        "agent_id": agent_id,
                        "property_key": m.property_key,
                        "score": m.score,
                        "reasons": m.reasons,
                        "street_address": address,
                        "list_price": m.property.list_price,
                        "square_feet": m.property.square_feet,
                        "days_on_market": m.property.days_on_market,
                        "deal_quality": deal_quality,
                    });
                    insert_outbox(&tx, agent_id, Some(&match_id), OutboxEventKind::NewMatch, &payload)?;
                    new_matches += 1;
                }
                MatchEvent::PriceDrop(p) => {
                    tx.execute(
                        "UPDATE matches SET captured_price = ?3 WHERE agent_id = ?1 AND property_key = ?2",
                        params![agent_id, p.property_key, p.new_price],
                    )?;
                    let row: Option<(String, String, i64, String)> = tx
                        .query_row(
                            "SELECT id, property_snapshot_json, match_score, reasons_json
                             FROM matches WHERE agent_id = ?1 AND property_key = ?2",
                            params![agent_id, p.property_key],
                            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                        )
                        .optional()?;
                    let (match_id, property_json, score, reasons_json) = row.unwrap_or_default();
                    let property_value: Value =
                        serde_json::from_str(&property_json).unwrap_or(Value::Null);
                    let reasons: Value =
                        serde_json::from_str(&reasons_json).unwrap_or_else(|_| json!([]));
                    let payload = json!({
                        "kind": "price_drop",
                        "match_id": match_id,
                        "agent_id": agent_id,
                        "property_key": p.property_key,
                        "old_price": p.old_price,
                        "new_price": p.new_price,
                        "score": score,
                        "reasons": reasons,
                        "street_address": property_value.get("street_address").cloned().unwrap_or(Value::Null),
                        "square_feet": property_value.get("square_feet").cloned().unwrap_or(Value::Null),
                        "days_on_market": property_value.get("days_on_market").cloned().unwrap_or(Value::Null),
                        "deal_quality": property_value.get("deal_quality").cloned().unwrap_or(Value::Null),
                    });
                    insert_outbox(
                        &tx,
                        agent_id,
                        if match_id.is_empty() { None } else { Some(&match_id) },
                        OutboxEventKind::PriceDrop,
                        &payload,
                    )?;
                    price_drops += 1;
                }
            }
        }

        tx.execute(
            "UPDATE agents SET last_check_at = ?2, next_check_at = ?3, check_count = check_count + 1,
                    match_count = match_count + ?4, consecutive_failures = 0, degraded = 0
             WHERE id = ?1",
            params![agent_id, checked_at, next_check_at, new_matches as i64],
        )?;

        tx.commit()?;
        Ok(PersistedCheck { new_matches, price_drops })
    }

    /// Persist a failed check: bump `consecutive_failures`, mark degraded
    /// once the threshold is crossed, and still advance `next_check_at`
    /// unless the check was forced (§4.4, §7).
    pub fn record_check_failure(
        &self,
        agent_id: &AgentId,
        checked_at: DateTime<Utc>,
        next_check_at: Option<DateTime<Utc>>,
        degraded_after: u32,
    ) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let consecutive_failures: i64 = tx
            .query_row(
                "SELECT consecutive_failures FROM agents WHERE id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .unwrap_or(0)
            + 1;
        let degraded = consecutive_failures as u32 >= degraded_after;
        tx.execute(
            "UPDATE agents SET last_check_at = ?2, next_check_at = ?3, check_count = check_count + 1,
                    consecutive_failures = ?4, degraded = ?5
             WHERE id = ?1",
            params![agent_id, checked_at, next_check_at, consecutive_failures, degraded as i64],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn insert_outbox(
    tx: &rusqlite::Transaction<'_>,
    agent_id: &AgentId,
    match_id: Option<&str>,
    kind: OutboxEventKind,
    payload: &Value,
) -> EngineResult<()> {
    let now = Utc::now();
    tx.execute(
        "INSERT INTO crm_outbox (id, agent_id, match_id, event_kind, payload_json, attempts,
                                  status, last_error, created_at, next_attempt_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 'pending', NULL, ?6, ?6)",
        params![
            uuid::Uuid::new_v4().to_string(),
            agent_id,
            match_id,
            kind.as_str(),
            payload.to_string(),
            now,
        ],
    )?;
    Ok(())
}
