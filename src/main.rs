// Dealwatch — process entry point.
//
// Loads configuration, opens the session store, rehydrates the corpus
// from its last backup (properties are ingested out of band by dropping
// a CSV file for an operator job to pick up — there is no HTTP ingest
// endpoint), then starts two background heartbeats alongside the HTTP
// server: the scheduler tick and the CRM outbox drain, the same
// "spawn a sleep-loop in setup, let it run for the life of the process"
// shape the corpus uses for its own cron heartbeat.

use std::sync::Arc;

use dealwatch::atoms::constants::TICK_INTERVAL;
use dealwatch::config::AppConfig;
use dealwatch::engine::corpus::CorpusStore;
use dealwatch::sessions::SessionStore;
use dealwatch::{commands, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load()?;
    log::info!("[startup] data_dir={:?} bind_addr={}", config.data_dir, config.bind_addr);

    let db_path = dealwatch::sessions::default_db_path(&config.data_dir);
    let store = SessionStore::open(&db_path)?;

    let backup_path = dealwatch::engine::corpus::default_backup_path(&config.data_dir);
    let corpus = CorpusStore::new(backup_path);
    if corpus.rehydrate()? {
        log::info!("[startup] corpus rehydrated from prior backup");
    } else {
        log::warn!("[startup] no corpus backup found; agents will see NoCorpus until a feed is ingested");
    }

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::build(config, store, corpus));

    // ── Scheduler heartbeat: due checks ──
    {
        let manager = Arc::clone(&state.manager);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                manager.run_due_checks().await;
            }
        });
    }

    // ── CRM sync heartbeat: drain the delivery outbox ──
    {
        let worker = Arc::clone(&state.crm_worker);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                let attempted = worker.drain_once().await;
                if attempted > 0 {
                    log::debug!("[crm-sync] attempted {attempted} outbox entr{}", if attempted == 1 { "y" } else { "ies" });
                }
            }
        });
    }

    let app = commands::router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr.as_str()).await?;
    log::info!("[startup] listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
