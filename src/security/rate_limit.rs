//! Fail-secure rate limiting keyed by identity and action.
//!
//! Counters live behind [`CounterStore`] so every worker in a deployment can
//! share one store; a per-process counter under-counts as soon as a second
//! worker serves the same identity. The in-tree store is the process-shared
//! map; a networked store implements the same trait.
//!
//! The limiter fails CLOSED: if the store errors, the answer is `Deny`, and
//! the audit trail records an `Error`-result event distinguishable from an
//! ordinary denial.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

use crate::audit::{unix_now, AuditEvent, AuditLog, AuditResult};
use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// Actions with independent limits and independent counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    SignIn,
    Scan,
    Lookup,
    Checkout,
    Checkin,
    Transfer,
    Admin,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SignIn => "sign_in",
            Action::Scan => "scan",
            Action::Lookup => "lookup",
            Action::Checkout => "checkout",
            Action::Checkin => "checkin",
            Action::Transfer => "transfer",
            Action::Admin => "admin",
        }
    }
}

/// Admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Counter store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Shared counter primitive: atomically increment the counter at `key` and
/// return the new value. The entry expires `ttl` after its first increment.
pub trait CounterStore: Send + Sync {
    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;
}

struct Bucket {
    count: u64,
    expires_at: Instant,
}

/// In-memory counter store shared by every task in this process.
#[derive(Default)]
pub struct MemoryCounterStore {
    buckets: DashMap<String, Bucket>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired buckets. Called opportunistically by the limiter.
    fn purge_expired(&self) {
        let now = Instant::now();
        self.buckets.retain(|_, bucket| bucket.expires_at > now);
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        if self.buckets.len() > 10_000 {
            self.purge_expired();
        }

        // The entry API holds the shard lock across the whole
        // read-modify-write, so two concurrent callers cannot both observe
        // the same stale count.
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            count: 0,
            expires_at: Instant::now() + ttl,
        });
        if entry.expires_at <= Instant::now() {
            entry.count = 0;
            entry.expires_at = Instant::now() + ttl;
        }
        entry.count += 1;
        Ok(entry.count)
    }
}

/// The admission gate. One per process, shared across handlers.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
    audit: AuditLog,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig, audit: AuditLog) -> Self {
        Self {
            store,
            config,
            audit,
        }
    }

    fn limit_for(&self, action: Action) -> u64 {
        match action {
            Action::SignIn => self.config.sign_in,
            Action::Scan => self.config.scan,
            Action::Lookup => self.config.lookup,
            Action::Checkout => self.config.checkout,
            Action::Checkin => self.config.checkin,
            Action::Transfer => self.config.transfer,
            Action::Admin => self.config.admin,
        }
    }

    /// Admit or deny one action for one identity.
    ///
    /// Emits exactly one audit event per denial; allowed actions are not
    /// audited here (their outcome is audited by whoever executes them).
    pub fn admit(&self, identity: &str, action: Action) -> Decision {
        if !self.config.enabled {
            return Decision::Allow;
        }

        let window = Duration::from_secs(self.config.window_secs);
        let now = unix_now();
        let window_index = now / self.config.window_secs;
        let retry_after = Duration::from_secs(self.config.window_secs - now % self.config.window_secs);

        let key = format!("{}:{}:{}", identity, action.as_str(), window_index);

        match self.store.increment(&key, window) {
            Ok(count) if count <= self.limit_for(action) => Decision::Allow,
            Ok(count) => {
                tracing::warn!(
                    identity = %identity,
                    action = action.as_str(),
                    count,
                    "Rate limit exceeded"
                );
                metrics::record_rate_limited(action.as_str());
                self.audit.record(
                    AuditEvent::new(format!("rate_limit.{}", action.as_str()), AuditResult::Denied)
                        .target(identity)
                        .detail(format!("count {} over limit {}", count, self.limit_for(action))),
                );
                Decision::Deny { retry_after }
            }
            Err(e) => {
                // Fail secure: an unreachable store means we cannot prove the
                // caller is under the limit, so the answer is no.
                tracing::error!(
                    identity = %identity,
                    action = action.as_str(),
                    error = %e,
                    "Counter store failed, denying admission"
                );
                metrics::record_limiter_store_failure();
                self.audit.record(
                    AuditEvent::new(format!("rate_limit.{}", action.as_str()), AuditResult::Error)
                        .target(identity)
                        .detail(format!("store failure: {}", e)),
                );
                Decision::Deny { retry_after }
            }
        }
    }
}
