// Adding a new table or column: append an idempotent CREATE TABLE IF NOT
// EXISTS or ALTER TABLE … ADD COLUMN (errors are silently swallowed) at
// the end of run_migrations() — never modify existing SQL so upgrade
// paths stay clean for databases created by older binaries.

use rusqlite::Connection;

use crate::atoms::error::EngineResult;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            notes TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS criteria (
            id TEXT PRIMARY KEY,
            locations_json TEXT NOT NULL DEFAULT '[]',
            price_min INTEGER,
            price_max INTEGER,
            bedrooms_min REAL,
            bathrooms_min REAL,
            property_types_json TEXT NOT NULL DEFAULT '[]',
            deal_quality_json TEXT NOT NULL DEFAULT '[]',
            min_score INTEGER NOT NULL DEFAULT 70,
            investment_type TEXT
        );

        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            criteria_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            last_check_at TEXT,
            next_check_at TEXT,
            check_count INTEGER NOT NULL DEFAULT 0,
            match_count INTEGER NOT NULL DEFAULT 0,
            notify_email INTEGER NOT NULL DEFAULT 0,
            notify_sms INTEGER NOT NULL DEFAULT 0,
            notify_chat INTEGER NOT NULL DEFAULT 0,
            degraded INTEGER NOT NULL DEFAULT 0,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (client_id) REFERENCES clients(id),
            FOREIGN KEY (criteria_id) REFERENCES criteria(id)
        );

        CREATE INDEX IF NOT EXISTS idx_agents_next_check
            ON agents (status, next_check_at);

        CREATE TABLE IF NOT EXISTS matches (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            property_key TEXT NOT NULL,
            match_score INTEGER NOT NULL,
            reasons_json TEXT NOT NULL DEFAULT '[]',
            property_snapshot_json TEXT NOT NULL,
            captured_price INTEGER,
            matched_at TEXT NOT NULL DEFAULT (datetime('now')),
            delivery_status TEXT NOT NULL DEFAULT 'new',
            FOREIGN KEY (agent_id) REFERENCES agents(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_matches_agent_property
            ON matches (agent_id, property_key);

        CREATE TABLE IF NOT EXISTS crm_outbox (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            match_id TEXT,
            event_kind TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            last_error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            next_attempt_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_pending
            ON crm_outbox (status, agent_id, created_at);
        ",
    )?;
    Ok(())
}
