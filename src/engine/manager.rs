// Dealwatch Engine: Agent Manager (§4.4 / C4)
//
// Owns the agent lifecycle state machine, the per-agent check procedure,
// and the scheduler fan-out. The scheduler itself is a dedicated ticker
// task spawned from `main.rs` calling `run_due_checks` — this module only
// exposes the tick and the check procedure it drives, not the `tokio`
// interval loop, matching the corpus's own separation between a cron
// heartbeat and the work it triggers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::atoms::constants::{CHECK_INTERVAL, CHECK_TIMEOUT, DEGRADED_AFTER_FAILURES, MAX_JITTER};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    Agent, AgentHealth, AgentId, AgentStatus, Criteria, Match, MatchEvent, NotificationPrefs,
};
use crate::sessions::clients::new_client;
use crate::sessions::SessionStore;

use super::corpus::CorpusStore;
use super::match_engine;

#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub new_matches: u64,
    pub price_drops: u64,
    pub took_ms: u64,
}

pub struct AgentManager {
    store: Arc<SessionStore>,
    corpus: Arc<CorpusStore>,
    scheduler_parallelism: usize,
    inflight: Mutex<HashSet<AgentId>>,
}

impl AgentManager {
    pub fn new(store: Arc<SessionStore>, corpus: Arc<CorpusStore>, scheduler_parallelism: usize) -> Self {
        Self {
            store,
            corpus,
            scheduler_parallelism,
            inflight: Mutex::new(HashSet::new()),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn create_agent(
        &self,
        client_name: String,
        client_email: Option<String>,
        client_phone: Option<String>,
        criteria: Criteria,
        notify: NotificationPrefs,
    ) -> EngineResult<Agent> {
        criteria.validate().map_err(EngineError::InvalidCriteria)?;

        let client = new_client(client_name, client_email, client_phone);
        self.store.create_client(&client)?;
        self.store.create_criteria(&criteria)?;

        let now = Utc::now();
        let agent = Agent {
            id: short_id("agent"),
            client_id: client.id,
            criteria_id: criteria.id,
            status: AgentStatus::Active,
            created_at: now,
            last_check_at: None,
            next_check_at: Some(now),
            check_count: 0,
            match_count: 0,
            notify,
            health: AgentHealth::default(),
        };
        self.store.create_agent(&agent)?;
        info!("[agent-manager] created agent {}", agent.id);
        Ok(agent)
    }

    pub fn get_agent(&self, id: &AgentId) -> EngineResult<Agent> {
        self.store.get_agent(id)
    }

    pub fn list_agents(&self, status: Option<AgentStatus>) -> EngineResult<Vec<Agent>> {
        let all = self.store.list_agents()?;
        Ok(match status {
            Some(s) => all.into_iter().filter(|a| a.status == s).collect(),
            None => all,
        })
    }

    pub fn list_matches(&self, id: &AgentId) -> EngineResult<Vec<Match>> {
        self.store.get_agent(id)?;
        self.store.list_matches_for_agent(id)
    }

    pub fn update_notify(&self, id: &AgentId, notify: NotificationPrefs) -> EngineResult<Agent> {
        self.store.update_agent_notify(id, notify)?;
        self.store.get_agent(id)
    }

    pub fn pause(&self, id: &AgentId) -> EngineResult<Agent> {
        let agent = self.store.get_agent(id)?;
        if agent.status.is_terminal() {
            return Err(EngineError::TerminalState(id.clone()));
        }
        if agent.status != AgentStatus::Active {
            return Err(EngineError::IllegalTransition(format!(
                "agent {id} is {:?}, cannot pause",
                agent.status
            )));
        }
        self.store.update_agent_status(id, AgentStatus::Paused)?;
        // Pausing cancels the pending check (§4.4).
        self.store.set_next_check(id, None)?;
        self.store.get_agent(id)
    }

    pub fn resume(&self, id: &AgentId) -> EngineResult<Agent> {
        let agent = self.store.get_agent(id)?;
        if agent.status.is_terminal() {
            return Err(EngineError::TerminalState(id.clone()));
        }
        if agent.status != AgentStatus::Paused {
            return Err(EngineError::IllegalTransition(format!(
                "agent {id} is {:?}, cannot resume",
                agent.status
            )));
        }
        self.store.update_agent_status(id, AgentStatus::Active)?;
        // No backfill: next check is a fresh interval from now.
        self.store.set_next_check(id, Some(Utc::now() + CHECK_INTERVAL))?;
        self.store.get_agent(id)
    }

    pub fn cancel(&self, id: &AgentId) -> EngineResult<Agent> {
        let agent = self.store.get_agent(id)?;
        if agent.status.is_terminal() {
            return Err(EngineError::TerminalState(id.clone()));
        }
        self.store.update_agent_status(id, AgentStatus::Cancelled)?;
        self.store.set_next_check(id, None)?;
        self.store.get_agent(id)
    }

    /// Explicit `completed` transition — spec.md §9 open question resolves
    /// this as command-only, never automatic.
    pub fn complete(&self, id: &AgentId) -> EngineResult<Agent> {
        let agent = self.store.get_agent(id)?;
        if agent.status.is_terminal() {
            return Err(EngineError::TerminalState(id.clone()));
        }
        self.store.update_agent_status(id, AgentStatus::Completed)?;
        self.store.set_next_check(id, None)?;
        self.store.get_agent(id)
    }

    /// `force_check`: synchronously runs a check out of band, leaving the
    /// regular cadence (`next_check_at`) undisturbed (§4.4).
    pub async fn force_check(self: &Arc<Self>, id: &AgentId) -> EngineResult<CheckSummary> {
        self.check_agent(id, true).await
    }

    // ── Scheduler ────────────────────────────────────────────────────────

    /// One scheduler tick: fan out bounded-parallel checks over every
    /// active agent whose `next_check_at` has passed. The caller (a
    /// `tokio::time::interval` loop in `main.rs`) is responsible for
    /// cadence; this call just does one pass.
    pub async fn run_due_checks(self: &Arc<Self>) {
        let due = match self.store.get_due_agents(Utc::now()) {
            Ok(agents) => agents,
            Err(e) => {
                warn!("[scheduler] failed to load due agents: {e}");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        info!("[scheduler] {} agent(s) due for a check", due.len());

        let semaphore = Arc::new(Semaphore::new(self.scheduler_parallelism));
        let mut handles = Vec::with_capacity(due.len());
        for agent in due {
            let manager = Arc::clone(self);
            let permit = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                if let Err(e) = manager.check_agent(&agent.id, false).await {
                    if !matches!(e, EngineError::Busy(_)) {
                        warn!("[scheduler] check failed for agent {}: {e}", agent.id);
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// `POST /api/properties/scan`: fan out force-checks across every
    /// active agent. Returns the number of agents checked.
    pub async fn scan_all(self: &Arc<Self>) -> EngineResult<usize> {
        let agents = self.list_agents(Some(AgentStatus::Active))?;
        let semaphore = Arc::new(Semaphore::new(self.scheduler_parallelism));
        let mut handles = Vec::with_capacity(agents.len());
        for agent in agents {
            let manager = Arc::clone(self);
            let permit = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                if let Err(e) = manager.check_agent(&agent.id, true).await {
                    if !matches!(e, EngineError::Busy(_)) {
                        warn!("[scan-all] check failed for agent {}: {e}", agent.id);
                    }
                }
            }));
        }
        let n = handles.len();
        for handle in handles {
            let _ = handle.await;
        }
        Ok(n)
    }

    // ── Check procedure (§4.4 steps 1-8) ────────────────────────────────

    async fn check_agent(&self, id: &AgentId, forced: bool) -> EngineResult<CheckSummary> {
        let started = Instant::now();

        // Step: terminal-state rejection happens before any lock
        // acquisition or corpus I/O (Scenario E).
        let agent = self.store.get_agent(id)?;
        if agent.status.is_terminal() {
            return Err(EngineError::TerminalState(id.clone()));
        }

        // Step 1: acquire the per-agent lock, non-blocking.
        {
            let mut inflight = self.inflight.lock();
            if !inflight.insert(id.clone()) {
                return Err(EngineError::Busy(id.clone()));
            }
        }

        let result = tokio::time::timeout(CHECK_TIMEOUT, self.run_check(&agent, forced)).await;

        self.inflight.lock().remove(id);

        match result {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(e)) => {
                self.handle_check_failure(id, forced);
                Err(e)
            }
            Err(_) => {
                self.handle_check_failure(id, forced);
                Err(EngineError::TimeoutExceeded(CHECK_TIMEOUT))
            }
        }
        .map(|mut summary: CheckSummary| {
            summary.took_ms = started.elapsed().as_millis() as u64;
            summary
        })
    }

    /// Steps 2-7: load criteria/matches, evaluate, persist atomically.
    async fn run_check(&self, agent: &Agent, forced: bool) -> EngineResult<CheckSummary> {
        let criteria = self.store.get_criteria(&agent.criteria_id)?;
        let existing = self.store.existing_match_prices(&agent.id)?;
        let properties = self.corpus.require_properties()?;

        let outcomes = match_engine::evaluate(&properties, &criteria, &existing)?;

        let new_matches = outcomes
            .iter()
            .filter(|e| matches!(e, match_engine::MatchOutcome::New(_)))
            .count() as u64;
        let price_drops = outcomes
            .iter()
            .filter(|e| matches!(e, match_engine::MatchOutcome::PriceDrop(_)))
            .count() as u64;
        let events: Vec<MatchEvent> = outcomes
            .into_iter()
            .map(|o| match o {
                match_engine::MatchOutcome::New(m) => MatchEvent::New(m),
                match_engine::MatchOutcome::PriceDrop(p) => MatchEvent::PriceDrop(p),
            })
            .collect();

        let next_check_at = if forced {
            agent.next_check_at
        } else {
            Some(next_check_time(Utc::now()))
        };

        self.store
            .persist_check_outcomes(&agent.id, Utc::now(), next_check_at, &events)?;

        Ok(CheckSummary {
            new_matches,
            price_drops,
            took_ms: 0,
        })
    }

    fn handle_check_failure(&self, id: &AgentId, forced: bool) {
        let next_check_at = if forced {
            self.store.get_agent(id).ok().and_then(|a| a.next_check_at)
        } else {
            Some(Utc::now() + CHECK_INTERVAL)
        };
        if let Err(e) =
            self.store
                .record_check_failure(id, Utc::now(), next_check_at, DEGRADED_AFTER_FAILURES)
        {
            warn!("[agent-manager] failed to record check failure for {id}: {e}");
        }
    }
}

/// Next scheduled check: `CHECK_INTERVAL` from now, plus up to
/// `MAX_JITTER` to avoid herd effects (§4.4).
fn next_check_time(now: DateTime<Utc>) -> DateTime<Utc> {
    let jitter_secs = rand::rng().random_range(0..=MAX_JITTER.as_secs());
    now + CHECK_INTERVAL + chrono::Duration::seconds(jitter_secs as i64)
}

fn short_id(prefix: &str) -> String {
    format!("{prefix}_{}", &uuid::Uuid::new_v4().simple().to_string()[..10])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{DealQuality, PropertyStatus};

    fn sample_criteria() -> Criteria {
        Criteria {
            id: "will-be-replaced".into(),
            locations: vec!["92128".into()],
            price_min: Some(600_000),
            price_max: Some(1_200_000),
            bedrooms_min: Some(3.0),
            bathrooms_min: Some(2.0),
            property_types: vec![],
            deal_quality: vec![],
            min_score: 70,
            investment_type: None,
        }
    }

    fn sample_property() -> crate::atoms::types::Property {
        crate::atoms::types::Property {
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
        }
    }

    fn setup() -> (Arc<AgentManager>, Agent) {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let corpus = Arc::new(CorpusStore::new(super::super::corpus::default_backup_path(dir.path())));
        corpus.swap(vec![sample_property()]).unwrap();
        let manager = Arc::new(AgentManager::new(store, corpus, 8));
        let agent = manager
            .create_agent("Jane".into(), None, None, sample_criteria(), NotificationPrefs::default())
            .unwrap();
        (manager, agent)
    }

    #[tokio::test]
    async fn scenario_a_first_force_check_matches_once() {
        let (manager, agent) = setup();
        let summary = manager.force_check(&agent.id).await.unwrap();
        assert_eq!(summary.new_matches, 1);
        assert_eq!(summary.price_drops, 0);

        let matches = manager.list_matches(&agent.id).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].match_score, 90);
    }

    #[tokio::test]
    async fn scenario_b_repeat_force_check_is_idempotent() {
        let (manager, agent) = setup();
        manager.force_check(&agent.id).await.unwrap();
        let summary = manager.force_check(&agent.id).await.unwrap();
        assert_eq!(summary.new_matches, 0);
        assert_eq!(summary.price_drops, 0);

        let refreshed = manager.get_agent(&agent.id).unwrap();
        assert_eq!(refreshed.match_count, 1);
        assert_eq!(refreshed.check_count, 2);
    }

    #[tokio::test]
    async fn forced_check_does_not_disturb_next_check_cadence() {
        let (manager, agent) = setup();
        let before = manager.get_agent(&agent.id).unwrap().next_check_at;
        manager.force_check(&agent.id).await.unwrap();
        let after = manager.get_agent(&agent.id).unwrap().next_check_at;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn scenario_e_terminal_state_rejects_lifecycle_and_check() {
        let (manager, agent) = setup();
        manager.cancel(&agent.id).unwrap();

        assert!(matches!(
            manager.force_check(&agent.id).await,
            Err(EngineError::TerminalState(_))
        ));
        assert!(matches!(manager.pause(&agent.id), Err(EngineError::TerminalState(_))));
        assert!(matches!(manager.resume(&agent.id), Err(EngineError::TerminalState(_))));
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_through_active() {
        let (manager, agent) = setup();
        let paused = manager.pause(&agent.id).unwrap();
        assert_eq!(paused.status, AgentStatus::Paused);
        assert!(paused.next_check_at.is_none());

        let resumed = manager.resume(&agent.id).unwrap();
        assert_eq!(resumed.status, AgentStatus::Active);
        assert!(resumed.next_check_at.is_some());
    }

    #[tokio::test]
    async fn resume_on_active_agent_is_illegal_transition() {
        let (manager, agent) = setup();
        assert!(matches!(
            manager.resume(&agent.id),
            Err(EngineError::IllegalTransition(_))
        ));
    }

    #[tokio::test]
    async fn invalid_criteria_rejects_agent_creation() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let corpus = Arc::new(CorpusStore::new(super::super::corpus::default_backup_path(dir.path())));
        let manager = Arc::new(AgentManager::new(store, corpus, 8));
        let mut criteria = sample_criteria();
        criteria.locations = vec![];
        let result = manager.create_agent("Jane".into(), None, None, criteria, NotificationPrefs::default());
        assert!(matches!(result, Err(EngineError::InvalidCriteria(_))));
    }

    #[tokio::test]
    async fn deal_quality_filter_is_honored_end_to_end() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let corpus = Arc::new(CorpusStore::new(super::super::corpus::default_backup_path(dir.path())));
        let mut property = sample_property();
        property.deal_quality = Some(DealQuality::Fair);
        corpus.swap(vec![property]).unwrap();
        let manager = Arc::new(AgentManager::new(store, corpus, 8));
        let mut criteria = sample_criteria();
        criteria.deal_quality = vec![DealQuality::Hot];
        let agent = manager
            .create_agent("Jane".into(), None, None, criteria, NotificationPrefs::default())
            .unwrap();
        let summary = manager.force_check(&agent.id).await.unwrap();
        assert_eq!(summary.new_matches, 0);
    }
}
