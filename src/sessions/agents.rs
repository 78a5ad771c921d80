use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Agent, AgentHealth, AgentId, AgentStatus, NotificationPrefs};

use super::SessionStore;

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let status: String = row.get(3)?;
    Ok(Agent {
        id: row.get(0)?,
        client_id: row.get(1)?,
        criteria_id: row.get(2)?,
        status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Active),
        created_at: row.get(4)?,
        last_check_at: row.get(5)?,
        next_check_at: row.get(6)?,
        check_count: row.get::<_, i64>(7)? as u64,
        match_count: row.get::<_, i64>(8)? as u64,
        notify: NotificationPrefs {
            email: row.get::<_, i64>(9)? != 0,
            sms: row.get::<_, i64>(10)? != 0,
            chat: row.get::<_, i64>(11)? != 0,
        },
        health: AgentHealth {
            degraded: row.get::<_, i64>(12)? != 0,
            consecutive_failures: row.get::<_, i64>(13)? as u32,
        },
    })
}

const SELECT_COLUMNS: &str = "id, client_id, criteria_id, status, created_at, last_check_at,
     next_check_at, check_count, match_count, notify_email, notify_sms, notify_chat,
     degraded, consecutive_failures";

impl SessionStore {
    pub fn create_agent(&self, agent: &Agent) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agents (id, client_id, criteria_id, status, created_at, last_check_at,
                                  next_check_at, check_count, match_count, notify_email,
                                  notify_sms, notify_chat, degraded, consecutive_failures)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                agent.id,
                agent.client_id,
                agent.criteria_id,
                agent.status.as_str(),
                agent.created_at,
                agent.last_check_at,
                agent.next_check_at,
                agent.check_count as i64,
                agent.match_count as i64,
                agent.notify.email as i64,
                agent.notify.sms as i64,
                agent.notify.chat as i64,
                agent.health.degraded as i64,
                agent.health.consecutive_failures as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, id: &AgentId) -> EngineResult<Agent> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM agents WHERE id = ?1"),
            params![id],
            from_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::NotFound {
            kind: "agent",
            id: id.clone(),
        })
    }

    pub fn list_agents(&self) -> EngineResult<Vec<Agent>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM agents ORDER BY created_at DESC"))?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Agents due for a scheduler tick: active status and next_check_at
    /// at or before `now`.
    pub fn get_due_agents(&self, now: DateTime<Utc>) -> EngineResult<Vec<Agent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM agents
             WHERE status = 'active' AND next_check_at IS NOT NULL AND next_check_at <= ?1"
        ))?;
        let rows = stmt
            .query_map(params![now], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_agent_status(&self, id: &AgentId, status: AgentStatus) -> EngineResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE agents SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound {
                kind: "agent",
                id: id.clone(),
            });
        }
        Ok(())
    }

    pub fn update_agent_notify(&self, id: &AgentId, notify: NotificationPrefs) -> EngineResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE agents SET notify_email = ?2, notify_sms = ?3, notify_chat = ?4 WHERE id = ?1",
            params![id, notify.email as i64, notify.sms as i64, notify.chat as i64],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound {
                kind: "agent",
                id: id.clone(),
            });
        }
        Ok(())
    }

    /// Force `next_check_at` to a specific value, or clear it entirely
    /// (`None`) — used when pausing/cancelling an agent so a stale due-date
    /// doesn't resurrect it once it goes back to active (§4.4, §6.1).
    pub fn set_next_check(&self, id: &AgentId, next_check_at: Option<DateTime<Utc>>) -> EngineResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE agents SET next_check_at = ?2 WHERE id = ?1",
            params![id, next_check_at],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound {
                kind: "agent",
                id: id.clone(),
            });
        }
        Ok(())
    }

    /// Mark an agent degraded outside of the regular check-result path —
    /// used when CRM delivery itself fails permanently (401/403) rather
    /// than the property check (§4.5, §7).
    pub fn mark_agent_degraded(&self, id: &AgentId) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE agents SET degraded = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Count of active agents and, among those, how many are degraded —
    /// feeds the `/health` endpoint (§6.1).
    pub fn health_counts(&self) -> EngineResult<(u64, u64)> {
        let conn = self.conn.lock();
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM agents WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;
        let degraded: i64 = conn.query_row(
            "SELECT COUNT(*) FROM agents WHERE status = 'active' AND degraded = 1",
            [],
            |row| row.get(0),
        )?;
        Ok((active as u64, degraded as u64))
    }

}
