// Dealwatch Engine: Corpus Store (§4.1 / C1)
//
// Holds the current property listing snapshot in memory behind a
// `parking_lot::RwLock` so readers never block each other and a writer
// only ever replaces the whole pointer, never a partial snapshot. A JSON
// copy of the current snapshot is written to disk on every swap so a
// restart can rehydrate without waiting on the next ingest, and the
// snapshot it replaces is additionally archived under a timestamp-keyed
// path in a `corpus_backups/` sibling directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use parking_lot::RwLock;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Property, Snapshot};

/// Thread-safe holder for the most recent corpus snapshot.
pub struct CorpusStore {
    current: RwLock<Option<Arc<Snapshot>>>,
    backup_path: PathBuf,
    swap_count: AtomicU64,
}

impl CorpusStore {
    pub fn new(backup_path: impl Into<PathBuf>) -> Self {
        Self {
            current: RwLock::new(None),
            backup_path: backup_path.into(),
            swap_count: AtomicU64::new(0),
        }
    }

    /// Load a prior snapshot from disk if present, for restart recovery.
    pub fn rehydrate(&self) -> EngineResult<bool> {
        if !self.backup_path.exists() {
            return Ok(false);
        }
        let bytes = std::fs::read(&self.backup_path)?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        info!(
            "[corpus] rehydrated {} properties from {}",
            snapshot.properties.len(),
            self.backup_path.display()
        );
        *self.current.write() = Some(Arc::new(snapshot));
        Ok(true)
    }

    /// Current snapshot, or `None` if nothing has ever been ingested.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    /// Replace the corpus atomically, archive the outgoing snapshot under
    /// a timestamp-keyed path, and persist the new one to the fixed
    /// rehydrate path. Never fails the in-memory swap even if either disk
    /// write fails, but the caller is given the IO error to log.
    pub fn swap(&self, properties: Vec<Property>) -> EngineResult<Arc<Snapshot>> {
        let snapshot = Arc::new(Snapshot {
            properties,
            taken_at: Utc::now(),
        });
        let previous = {
            let mut guard = self.current.write();
            std::mem::replace(&mut *guard, Some(snapshot.clone()))
        };
        self.swap_count.fetch_add(1, Ordering::Relaxed);
        if let Some(outgoing) = previous {
            if let Err(e) = self.archive(&outgoing) {
                warn!("[corpus] failed to archive outgoing snapshot: {e}");
            }
        }
        if let Err(e) = self.persist(&snapshot) {
            warn!("[corpus] failed to persist snapshot backup: {e}");
        }
        Ok(snapshot)
    }

    fn persist(&self, snapshot: &Snapshot) -> EngineResult<()> {
        if let Some(parent) = self.backup_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.backup_path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(snapshot)?;
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &self.backup_path)?;
        Ok(())
    }

    /// Archive directory for outgoing snapshots, sibling to the fixed
    /// rehydrate path.
    fn archive_dir(&self) -> PathBuf {
        match self.backup_path.parent() {
            Some(parent) => parent.join("corpus_backups"),
            None => PathBuf::from("corpus_backups"),
        }
    }

    /// Write the previously-current snapshot to `corpus_backups/`, keyed
    /// by its own `taken_at` timestamp, so it's retained once superseded
    /// (§4.1: "archive the previously-current snapshot as backup...
    /// keyed by its timestamp"). This is separate from `persist`, which
    /// always holds the *current* snapshot for rehydrate-on-restart.
    fn archive(&self, snapshot: &Snapshot) -> EngineResult<()> {
        let dir = self.archive_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("corpus_snapshot_{}.json", snapshot.taken_at.timestamp()));
        let bytes = serde_json::to_vec(snapshot)?;
        std::fs::write(&path, bytes)?;
        Ok(())
    }

    pub fn swap_count(&self) -> u64 {
        self.swap_count.load(Ordering::Relaxed)
    }

    /// Convenience accessor used by the match engine: returns a clone of
    /// `properties` or `NoCorpus` if nothing has ever been ingested.
    pub fn require_properties(&self) -> EngineResult<Vec<Property>> {
        match self.current() {
            Some(snapshot) => Ok(snapshot.properties.clone()),
            None => Err(EngineError::NoCorpus),
        }
    }
}

/// Default backup location under the engine's data directory.
pub fn default_backup_path(data_dir: &Path) -> PathBuf {
    data_dir.join("corpus_snapshot.json")
}
