// Dealwatch Session Store — durable state in SQLite via rusqlite.
// Independent connection from anything the HTTP layer might otherwise
// reach for; this module owns migrations and all persistence.
//
// Module layout:
//   schema    — idempotent CREATE TABLE migrations
//   clients   — client CRUD
//   criteria  — search-criteria CRUD
//   agents    — agent lifecycle + scheduler queries
//   matches   — match CRUD + delivery status updates
//   outbox    — CRM delivery outbox CRUD
//   checks    — transactional persistence of a completed check's outcomes

use std::path::{Path, PathBuf};

use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;

use crate::atoms::error::EngineResult;

pub mod agents;
pub mod checks;
pub mod clients;
pub mod criteria;
pub mod matches;
pub mod outbox;
mod schema;

/// Thread-safe database wrapper. One connection, serialized by a mutex —
/// SQLite's own write-lock would serialize writers anyway, and WAL mode
/// lets readers proceed without blocking on it.
pub struct SessionStore {
    pub(crate) conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (or create) the store's SQLite database and run migrations.
    pub fn open(path: &Path) -> EngineResult<Self> {
        info!("[sessions] opening store at {:?}", path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        schema::run_migrations(&conn)?;
        Ok(SessionStore {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests: fresh schema, nothing persisted to disk.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        schema::run_migrations(&conn)?;
        Ok(SessionStore {
            conn: Mutex::new(conn),
        })
    }
}

/// Default on-disk database path under the engine's data directory.
pub fn default_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("dealwatch.sqlite3")
}
