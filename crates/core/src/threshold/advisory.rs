//! External advisory hookup: provider trait and per-session rate limiting.
//!
//! The advisory is optional and never authoritative; its failures are
//! absorbed locally and its suggestions are held to the same constraints as
//! the baseline candidates. The session table lives on the selector
//! instance, not in a module-level global, so tests and shards stay
//! deterministic.

use crate::error::AdvisoryError;
use crate::threshold::{LogHistogram, SelectionPriors};
use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;

/// Source of an external advisory threshold (linear concentration units).
///
/// Implementations own their transport, timeout, and parsing; the selector
/// retries once on any error and otherwise falls back to the baseline.
pub trait AdvisoryProvider {
    fn advise(
        &mut self,
        histogram: &LogHistogram,
        priors: &SelectionPriors,
    ) -> Result<f64, AdvisoryError>;
}

/// Per-session advisory quota.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    /// Minimum spacing between advisory calls in one session.
    pub min_interval: Duration,
    /// Advisory calls allowed over a session's lifetime.
    pub max_calls_per_session: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        RateLimitPolicy {
            min_interval: Duration::seconds(30),
            max_calls_per_session: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SessionUsage {
    calls: u32,
    last_call: Option<DateTime<Utc>>,
}

/// Outcome of asking the gate for one advisory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateDecision {
    /// Slot granted and counted.
    Allowed,
    /// Quota exhausted or interval not yet elapsed.
    Limited {
        /// When the next call may succeed; `None` when the per-session
        /// quota is spent for good.
        next_allowed_at: Option<DateTime<Utc>>,
    },
}

/// Session-keyed rate limiter owned by the threshold selector.
#[derive(Debug, Default)]
pub(crate) struct SessionGate {
    policy: RateLimitPolicy,
    sessions: FxHashMap<String, SessionUsage>,
}

impl SessionGate {
    pub fn new(policy: RateLimitPolicy) -> Self {
        SessionGate {
            policy,
            sessions: FxHashMap::default(),
        }
    }

    /// Try to take one advisory slot for the session at `now`.
    pub fn check_and_count(&mut self, session_id: &str, now: DateTime<Utc>) -> GateDecision {
        let usage = self.sessions.entry(session_id.to_string()).or_default();

        if usage.calls >= self.policy.max_calls_per_session {
            return GateDecision::Limited {
                next_allowed_at: None,
            };
        }
        if let Some(last) = usage.last_call {
            let next_allowed = last + self.policy.min_interval;
            if now < next_allowed {
                return GateDecision::Limited {
                    next_allowed_at: Some(next_allowed),
                };
            }
        }

        usage.calls += 1;
        usage.last_call = Some(now);
        GateDecision::Allowed
    }

    /// Calls this session has used so far.
    pub fn calls_used(&self, session_id: &str) -> u32 {
        self.sessions.get(session_id).map_or(0, |u| u.calls)
    }

    /// Earliest instant a further call could be granted, `None` once the
    /// session quota is spent.
    pub fn next_allowed_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        let usage = self.sessions.get(session_id)?;
        if usage.calls >= self.policy.max_calls_per_session {
            return None;
        }
        usage
            .last_call
            .map(|last| last + self.policy.min_interval)
    }
}
