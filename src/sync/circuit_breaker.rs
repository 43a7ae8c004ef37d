//! Per-account circuit breaker
//!
//! Pure transitions over [`RateLimitState`]. Callers load the state, ask
//! [`should_fetch`], call the provider and persist the result of
//! [`update_on_success`] or [`update_on_failure`].
//!
//! Every failure opens the circuit. The cool-down doubles with each
//! consecutive failure (`base * 2^(n-1)`) up to a cap; an upstream
//! `Retry-After` can only push the reopening further out. Once the
//! cool-down elapses the next fetch is a trial: success closes the
//! circuit, failure reopens it with a longer cool-down.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::SyncConfig;
use crate::data::RateLimitState;

/// Cool-down policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl BreakerPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            base_cooldown: Duration::seconds(config.breaker_base_cooldown_seconds.max(1)),
            max_cooldown: Duration::seconds(
                config
                    .breaker_max_cooldown_seconds
                    .max(config.breaker_base_cooldown_seconds.max(1)),
            ),
        }
    }

    /// Cool-down after `failures` consecutive failures
    pub fn cooldown(&self, failures: i64) -> Duration {
        if failures <= 0 {
            return Duration::zero();
        }
        // 2^62 seconds overflows chrono long before the cap matters
        let exponent = (failures - 1).min(62) as u32;
        let base = self.base_cooldown.num_seconds();
        let seconds = base
            .checked_mul(1_i64 << exponent)
            .unwrap_or(i64::MAX)
            .min(self.max_cooldown.num_seconds());
        Duration::seconds(seconds)
    }
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            base_cooldown: Duration::seconds(60),
            max_cooldown: Duration::hours(1),
        }
    }
}

/// Observable breaker phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    /// Cool-down elapsed; the next fetch is a trial
    HalfOpen,
}

pub fn phase(state: &RateLimitState, now: DateTime<Utc>) -> CircuitPhase {
    match state.circuit_open_until {
        Some(until) if now < until => CircuitPhase::Open,
        _ if state.consecutive_failures > 0 => CircuitPhase::HalfOpen,
        _ => CircuitPhase::Closed,
    }
}

/// Whether a provider call may be attempted now
///
/// Accounts without recorded state have never failed.
pub fn should_fetch(state: Option<&RateLimitState>, now: DateTime<Utc>) -> bool {
    state.is_none_or(|state| phase(state, now) != CircuitPhase::Open)
}

/// Record a failed fetch
///
/// # Arguments
/// * `retry_after` - Upstream-requested earliest retry, if any
pub fn update_on_failure(
    state: &RateLimitState,
    now: DateTime<Utc>,
    policy: &BreakerPolicy,
    retry_after: Option<DateTime<Utc>>,
) -> RateLimitState {
    let failures = state.consecutive_failures.saturating_add(1);
    let mut open_until = now + policy.cooldown(failures);
    if let Some(retry_after) = retry_after {
        open_until = open_until.max(retry_after);
    }
    // A stale open_until further out than the new one is kept
    if let Some(previous) = state.circuit_open_until {
        open_until = open_until.max(previous);
    }

    RateLimitState {
        account_id: state.account_id.clone(),
        consecutive_failures: failures,
        last_failure_at: Some(now),
        last_success_at: state.last_success_at,
        circuit_open_until: Some(open_until),
    }
}

/// Record a successful fetch; closes the circuit
pub fn update_on_success(state: &RateLimitState, now: DateTime<Utc>) -> RateLimitState {
    RateLimitState {
        account_id: state.account_id.clone(),
        consecutive_failures: 0,
        last_failure_at: state.last_failure_at,
        last_success_at: Some(now),
        circuit_open_until: None,
    }
}
