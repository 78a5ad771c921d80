// CRM delivery outbox: durable queue so match/price-drop events survive
// a restart between being produced and being acknowledged by the CRM.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{AgentId, MatchId};

use super::SessionStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutboxEventKind {
    NewMatch,
    PriceDrop,
}

impl OutboxEventKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            OutboxEventKind::NewMatch => "new_match",
            OutboxEventKind::PriceDrop => "price_drop",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "new_match" => Some(OutboxEventKind::NewMatch),
            "price_drop" => Some(OutboxEventKind::PriceDrop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Dead,
}

impl OutboxStatus {
    fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Dead => "dead",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "sent" => Some(OutboxStatus::Sent),
            "dead" => Some(OutboxStatus::Dead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: String,
    pub agent_id: AgentId,
    pub match_id: Option<MatchId>,
    pub kind: OutboxEventKind,
    pub payload_json: String,
    pub attempts: u32,
    pub status: OutboxStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
}

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let kind: String = row.get(3)?;
    let status: String = row.get(6)?;
    Ok(OutboxEntry {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        match_id: row.get(2)?,
        kind: OutboxEventKind::parse(&kind).unwrap_or(OutboxEventKind::NewMatch),
        payload_json: row.get(4)?,
        attempts: row.get::<_, i64>(5)? as u32,
        status: OutboxStatus::parse(&status).unwrap_or(OutboxStatus::Pending),
        last_error: row.get(7)?,
        created_at: row.get(8)?,
        next_attempt_at: row.get(9)?,
    })
}

const SELECT_COLUMNS: &str =
    "id, agent_id, match_id, event_kind, payload_json, attempts, status, last_error, created_at, next_attempt_at";

impl SessionStore {
    pub fn enqueue_outbox(
        &self,
        agent_id: &AgentId,
        match_id: Option<&MatchId>,
        kind: OutboxEventKind,
        payload_json: &str,
    ) -> EngineResult<OutboxEntry> {
        let now = Utc::now();
        let entry = OutboxEntry {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.clone(),
            match_id: match_id.cloned(),
            kind,
            payload_json: payload_json.to_string(),
            attempts: 0,
            status: OutboxStatus::Pending,
            last_error: None,
            created_at: now,
            next_attempt_at: now,
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO crm_outbox (id, agent_id, match_id, event_kind, payload_json, attempts,
                                      status, last_error, created_at, next_attempt_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.id,
                entry.agent_id,
                entry.match_id,
                entry.kind.as_str(),
                entry.payload_json,
                entry.attempts as i64,
                entry.status.as_str(),
                entry.last_error,
                entry.created_at,
                entry.next_attempt_at,
            ],
        )?;
        Ok(entry)
    }

    /// Pending entries due for delivery, oldest first per agent — FIFO
    /// per-agent ordering is the caller's responsibility to preserve by
    /// processing one agent's queue serially (§4.5).
    pub fn due_outbox_entries(&self, now: DateTime<Utc>) -> EngineResult<Vec<OutboxEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM crm_outbox
             WHERE status = 'pending' AND next_attempt_at <= ?1
             ORDER BY agent_id, created_at"
        ))?;
        let rows = stmt
            .query_map(params![now], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_outbox_sent(&self, id: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE crm_outbox SET status = 'sent' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn mark_outbox_retry(&self, id: &str, next_attempt_at: DateTime<Utc>, error: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE crm_outbox SET attempts = attempts + 1, next_attempt_at = ?2, last_error = ?3
             WHERE id = ?1",
            params![id, next_attempt_at, error],
        )?;
        Ok(())
    }

    pub fn mark_outbox_dead(&self, id: &str, error: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE crm_outbox SET status = 'dead', attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
            params![id, error],
        )?;
        Ok(())
    }

    pub fn get_outbox_entry(&self, id: &str) -> EngineResult<OutboxEntry> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM crm_outbox WHERE id = ?1"),
            params![id],
            from_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::NotFound {
            kind: "outbox_entry",
            id: id.to_string(),
        })
    }
}
