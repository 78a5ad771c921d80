use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{AgentId, DeliveryStatus, Match, MatchId, NewMatchOutcome};

use super::SessionStore;

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Match> {
    let reasons_json: String = row.get(4)?;
    let property_json: String = row.get(5)?;
    let delivery_status: String = row.get(7)?;
    Ok(Match {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        property_key: row.get(2)?,
        match_score: row.get::<_, i64>(3)? as u8,
        reasons: serde_json::from_str(&reasons_json).unwrap_or_default(),
        property_snapshot: serde_json::from_str(&property_json)
            .expect("property_snapshot_json must deserialize"),
        matched_at: row.get(6)?,
        delivery_status: DeliveryStatus::parse(&delivery_status).unwrap_or(DeliveryStatus::New),
    })
}

const SELECT_COLUMNS: &str =
    "id, agent_id, property_key, match_score, reasons_json, property_snapshot_json, matched_at, delivery_status";

impl SessionStore {
    /// Persist a NewMatch outcome from the match engine, returning the
    /// stored row.
    pub fn insert_match(&self, agent_id: &AgentId, outcome: &NewMatchOutcome) -> EngineResult<Match> {
        let new_match = Match {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.clone(),
            property_key: outcome.property_key.clone(),
            match_score: outcome.score,
            reasons: outcome.reasons.clone(),
            property_snapshot: outcome.property.clone(),
            matched_at: Utc::now(),
            delivery_status: DeliveryStatus::New,
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO matches (id, agent_id, property_key, match_score, reasons_json,
                                   property_snapshot_json, captured_price, matched_at, delivery_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new_match.id,
                new_match.agent_id,
                new_match.property_key,
                new_match.match_score as i64,
                serde_json::to_string(&new_match.reasons)?,
                serde_json::to_string(&new_match.property_snapshot)?,
                new_match.property_snapshot.list_price,
                new_match.matched_at,
                new_match.delivery_status.as_str(),
            ],
        )?;
        Ok(new_match)
    }

    pub fn get_match(&self, id: &MatchId) -> EngineResult<Match> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM matches WHERE id = ?1"),
            params![id],
            from_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::NotFound {
            kind: "match",
            id: id.clone(),
        })
    }

    pub fn list_matches_for_agent(&self, agent_id: &AgentId) -> EngineResult<Vec<Match>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM matches WHERE agent_id = ?1 ORDER BY matched_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![agent_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Map of `property_key -> captured price` for an agent's existing
    /// matches, the shape the match engine needs to detect price drops.
    pub fn existing_match_prices(&self, agent_id: &AgentId) -> EngineResult<HashMap<String, i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT property_key, captured_price FROM matches WHERE agent_id = ?1 AND captured_price IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(params![agent_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().collect())
    }

    pub fn update_captured_price(&self, agent_id: &AgentId, property_key: &str, new_price: i64) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE matches SET captured_price = ?3 WHERE agent_id = ?1 AND property_key = ?2",
            params![agent_id, property_key, new_price],
        )?;
        Ok(())
    }

    pub fn update_delivery_status(&self, id: &MatchId, status: DeliveryStatus) -> EngineResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE matches SET delivery_status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound {
                kind: "match",
                id: id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{Property, PropertyStatus};

    fn sample_outcome() -> NewMatchOutcome {
        NewMatchOutcome {
            property_key: "123 MAIN ST|92128".into(),
            score: 90,
            reasons: vec!["exact postal match 92128".into()],
            property: Property {
                street_address: "123 Main St".into(),
                city: None,
                postal_code: "92128".into(),
                list_price: Some(900_000),
                bedrooms: Some(3.0),
                bathrooms: Some(2.0),
                square_feet: Some(1800),
                days_on_market: Some(10),
                property_type: None,
                status: PropertyStatus::Active,
                deal_quality: None,
                opportunity_score: None,
                enrichment: None,
            },
        }
    }

    #[test]
    fn insert_and_get_roundtrips() {
        let store = SessionStore::open_in_memory().unwrap();
        let outcome = sample_outcome();
        let inserted = store.insert_match(&"agent-1".to_string(), &outcome).unwrap();
        let fetched = store.get_match(&inserted.id).unwrap();
        assert_eq!(fetched.match_score, 90);
        assert_eq!(fetched.delivery_status, DeliveryStatus::New);
    }

    #[test]
    fn existing_match_prices_feeds_price_drop_detection() {
        let store = SessionStore::open_in_memory().unwrap();
        let outcome = sample_outcome();
        store.insert_match(&"agent-1".to_string(), &outcome).unwrap();
        let prices = store.existing_match_prices(&"agent-1".to_string()).unwrap();
        assert_eq!(prices.get("123 MAIN ST|92128"), Some(&900_000));
    }

    #[test]
    fn update_delivery_status_persists() {
        let store = SessionStore::open_in_memory().unwrap();
        let outcome = sample_outcome();
        let inserted = store.insert_match(&"agent-1".to_string(), &outcome).unwrap();
        store
            .update_delivery_status(&inserted.id, DeliveryStatus::Sent)
            .unwrap();
        let fetched = store.get_match(&inserted.id).unwrap();
        assert_eq!(fetched.delivery_status, DeliveryStatus::Sent);
    }
}
