// Dealwatch Engine: HTTP retry & circuit-breaker utilities shared by the
// CRM sync worker (and, were one wired up, a real LLM-backed criteria
// extractor). Generalized from the same retry shape used elsewhere in the
// corpus for outbound provider calls: exponential backoff with jitter,
// `Retry-After` honoring, and a simple consecutive-failure circuit breaker.

use log::warn;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use crate::atoms::constants::{
    CRM_CIRCUIT_COOLDOWN_SECS, CRM_CIRCUIT_THRESHOLD, CRM_DEFAULT_RETRY_AFTER_SECS,
    CRM_INITIAL_RETRY_DELAY_MS, CRM_MAX_RETRIES, CRM_RETRY_BACKOFF_FACTOR,
};

pub const MAX_RETRIES: u32 = CRM_MAX_RETRIES;

/// True iff the HTTP status is worth retrying (§4.5: "on 5xx or network
/// errors"; 429 retried too, honoring Retry-After).
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Permanent failure per §4.5: 4xx other than 429.
pub fn is_permanent_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 429
}

/// Parse a `Retry-After` header value (integer seconds only; HTTP-date
/// format is not honored — falls back to computed backoff).
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    header_value.trim().parse::<u64>().ok()
}

/// Exponential backoff delay for retry attempt `attempt` (0-based):
/// 1s, 2s, 4s per §4.5. Honors a server `Retry-After` hint if present,
/// defaulting to 60s on 429 when the server sent none.
pub fn backoff_delay(attempt: u32, retry_after_secs: Option<u64>, was_rate_limited: bool) -> Duration {
    let computed_ms =
        CRM_INITIAL_RETRY_DELAY_MS * CRM_RETRY_BACKOFF_FACTOR.pow(attempt);
    if let Some(secs) = retry_after_secs {
        Duration::from_secs(secs)
    } else if was_rate_limited {
        Duration::from_secs(CRM_DEFAULT_RETRY_AFTER_SECS)
    } else {
        Duration::from_millis(computed_ms)
    }
}

/// Sleep for the computed backoff delay, returning the duration slept
/// (so callers can log it).
pub async fn retry_delay(attempt: u32, retry_after_secs: Option<u64>, was_rate_limited: bool) -> Duration {
    let delay = backoff_delay(attempt, retry_after_secs, was_rate_limited);
    tokio::time::sleep(delay).await;
    delay
}

/// A simple circuit breaker that trips after N consecutive failures, then
/// rejects requests for a cooldown period before allowing a probe through.
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    tripped_at: AtomicU64,
    threshold: u32,
    cooldown_secs: u64,
}

impl CircuitBreaker {
    pub const fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            tripped_at: AtomicU64::new(0),
            threshold,
            cooldown_secs,
        }
    }

    pub fn default_for_crm() -> Self {
        Self::new(CRM_CIRCUIT_THRESHOLD, CRM_CIRCUIT_COOLDOWN_SECS)
    }

    pub fn check(&self) -> Result<(), String> {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures < self.threshold {
            return Ok(());
        }
        let tripped = self.tripped_at.load(Ordering::Relaxed);
        let now = now_secs();
        if now - tripped < self.cooldown_secs {
            Err(format!(
                "circuit open: {failures} consecutive failures, cooling down {}s",
                self.cooldown_secs - (now - tripped)
            ))
        } else {
            Ok(())
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.tripped_at.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let prev = self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        if prev + 1 >= self.threshold {
            self.tripped_at.store(now_secs(), Ordering::Relaxed);
            warn!(
                "[crm-sync] circuit breaker tripped after {} consecutive failures",
                prev + 1
            );
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Per-account circuit breakers, keyed loosely by account/base-url so one
/// misbehaving CRM tenant doesn't trip delivery for every other agent.
pub struct CircuitBreakers {
    breakers: Mutex<std::collections::HashMap<String, CircuitBreaker>>,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> Result<(), String> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(key.to_string())
            .or_insert_with(CircuitBreaker::default_for_crm)
            .check()
    }

    pub fn record_success(&self, key: &str) {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(key.to_string())
            .or_insert_with(CircuitBreaker::default_for_crm)
            .record_success();
    }

    pub fn record_failure(&self, key: &str) {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(key.to_string())
            .or_insert_with(CircuitBreaker::default_for_crm)
            .record_failure();
    }
}
