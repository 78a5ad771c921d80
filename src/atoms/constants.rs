// Dealwatch Atoms: Constants
// All named constants for the crate live here, matching §4.4/§4.5/§5's
// numeric defaults so a single place can be audited against the spec.

use std::time::Duration;

// ── Scheduler cadence (§4.4) ───────────────────────────────────────────────

/// Default per-agent check interval: every 4 hours from `last_check_at`.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Upper bound on scheduling jitter added to avoid herd effects.
pub const MAX_JITTER: Duration = Duration::from_secs(5 * 60);

/// How often the scheduler ticker wakes up to look for due agents.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on concurrent per-agent checks (§5).
pub const DEFAULT_SCHEDULER_PARALLELISM: usize = 8;

/// Wall-clock budget for a single check before it is aborted as timed out.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// Consecutive check failures before an agent is marked degraded (§4.4, §7).
pub const DEGRADED_AFTER_FAILURES: u32 = 3;

// ── CRM delivery retry policy (§4.5) ───────────────────────────────────────

pub const CRM_MAX_RETRIES: u32 = 3;
pub const CRM_INITIAL_RETRY_DELAY_MS: u64 = 1_000;
pub const CRM_RETRY_BACKOFF_FACTOR: u64 = 2;
pub const CRM_DEFAULT_RETRY_AFTER_SECS: u64 = 60;
pub const CRM_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive permanent-looking CRM failures before the circuit trips.
pub const CRM_CIRCUIT_THRESHOLD: u32 = 5;
pub const CRM_CIRCUIT_COOLDOWN_SECS: u64 = 60;

// ── Scoring (§4.3) ──────────────────────────────────────────────────────

pub const SCORE_BASE: i32 = 50;
pub const SCORE_MIN: i32 = 0;
pub const SCORE_MAX: i32 = 100;
