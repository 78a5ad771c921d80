// Dealwatch: an autonomous property-monitoring service. An `Agent` binds
// a client's search criteria to a recurring check against the current
// property corpus; matches are persisted, delivered to a CRM, and
// surfaced over a small HTTP API.
//
// Module layout mirrors the corpus's own split between pure/stateful
// domain logic (`atoms`, `engine`), persistence (`sessions`), and the
// thin outer-facing layer that talks to the rest of the world
// (`commands`, here HTTP instead of Tauri IPC).

pub mod atoms;
pub mod commands;
pub mod config;
pub mod engine;
pub mod sessions;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::engine::corpus::CorpusStore;
use crate::engine::criteria_extractor::{CriteriaExtractor, HeuristicCriteriaExtractor};
use crate::engine::crm::{CrmClient, CrmSyncWorker, HttpCrmClient, NoopCrmClient};
use crate::engine::manager::AgentManager;
use crate::sessions::SessionStore;

/// Shared application state, handed to every axum handler via
/// `State<Arc<AppState>>` (the same "one state struct, cloned behind an
/// `Arc`" shape the corpus uses for its Tauri-managed state).
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub corpus: Arc<CorpusStore>,
    pub manager: Arc<AgentManager>,
    pub criteria_extractor: Arc<dyn CriteriaExtractor>,
    pub crm_worker: Arc<CrmSyncWorker>,
    pub config: AppConfig,
}

impl AppState {
    /// Wires up the full collaborator graph from a loaded config. Extracted
    /// from `main.rs` so integration tests can build the same state without
    /// going through the process entry point.
    pub fn build(config: AppConfig, store: SessionStore, corpus: CorpusStore) -> Self {
        let store = Arc::new(store);
        let corpus = Arc::new(corpus);
        let manager = Arc::new(AgentManager::new(
            Arc::clone(&store),
            Arc::clone(&corpus),
            config.scheduler.parallelism,
        ));
        let criteria_extractor: Arc<dyn CriteriaExtractor> = Arc::new(HeuristicCriteriaExtractor);
        let crm_client: Arc<dyn CrmClient> = match &config.crm.base_url {
            Some(base_url) => match HttpCrmClient::new(base_url.clone(), config.crm.api_key.clone()) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    log::warn!("[startup] invalid CRM base_url, CRM sync disabled: {e}");
                    Arc::new(NoopCrmClient)
                }
            },
            None => Arc::new(NoopCrmClient),
        };
        let crm_worker = Arc::new(CrmSyncWorker::new(Arc::clone(&store), crm_client, config.crm.clone()));

        Self {
            store,
            corpus,
            manager,
            criteria_extractor,
            crm_worker,
            config,
        }
    }
}
