use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Client, ClientId, ClientStatus};

use super::SessionStore;

fn status_str(status: &ClientStatus) -> &'static str {
    match status {
        ClientStatus::Active => "active",
        ClientStatus::Inactive => "inactive",
    }
}

fn parse_status(s: &str) -> ClientStatus {
    match s {
        "inactive" => ClientStatus::Inactive,
        _ => ClientStatus::Active,
    }
}

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: row.get(0)?,
        display_name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        notes: row.get(4)?,
        status: parse_status(&row.get::<_, String>(5)?),
        created_at: row.get(6)?,
    })
}

impl SessionStore {
    pub fn create_client(&self, client: &Client) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO clients (id, display_name, email, phone, notes, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                client.id,
                client.display_name,
                client.email,
                client.phone,
                client.notes,
                status_str(&client.status),
                client.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_client(&self, id: &ClientId) -> EngineResult<Client> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, display_name, email, phone, notes, status, created_at
             FROM clients WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::NotFound {
            kind: "client",
            id: id.clone(),
        })
    }

    pub fn list_clients(&self) -> EngineResult<Vec<Client>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, display_name, email, phone, notes, status, created_at
             FROM clients ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_client_status(&self, id: &ClientId, status: ClientStatus) -> EngineResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE clients SET status = ?2 WHERE id = ?1",
            params![id, status_str(&status)],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound {
                kind: "client",
                id: id.clone(),
            });
        }
        Ok(())
    }
}

pub fn new_client(display_name: String, email: Option<String>, phone: Option<String>) -> Client {
    Client {
        id: uuid::Uuid::new_v4().to_string(),
        display_name,
        email,
        phone,
        notes: None,
        status: ClientStatus::Active,
        created_at: Utc::now(),
    }
}
