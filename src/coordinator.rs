//! Asset transaction coordinator.
//!
//! Drives checkout / checkin / transfer as a small state machine against the
//! remote system of record. The remote offers no transactions, so the
//! coordinator runs optimistic concurrency: local precondition check, a
//! re-read immediately before commit to narrow the race window, and
//! authoritative handling of remote rejections (`RemoteConflict`, never a
//! blind retry).
//!
//! Preconditions short-circuit in a fixed order: session valid and
//! authorized → rate limiter admits → asset tag resolves remotely.
//!
//! Same-process requests for one tag serialize on a per-tag mutex. That
//! narrows local races only; other kiosk instances exist, which is why the
//! pre-commit re-read is mandatory.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::audit::{AuditEvent, AuditLog, AuditResult};
use crate::config::RetryConfig;
use crate::error::{EngineError, EngineResult};
use crate::inventory::{AssetState, AssetStatus, InventoryApi, InventoryError};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::security::rate_limit::{Action, Decision, RateLimiter};
use crate::security::session::Session;
use crate::security::validate::{validate_code, validate_note};

const MAX_NOTE_LEN: usize = 200;

/// State-changing operations the coordinator executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Checkout,
    Checkin,
    Transfer,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Checkout => "checkout",
            Operation::Checkin => "checkin",
            Operation::Transfer => "transfer",
        }
    }

    fn rate_limit_action(&self) -> Action {
        match self {
            Operation::Checkout => Action::Checkout,
            Operation::Checkin => Action::Checkin,
            Operation::Transfer => Action::Transfer,
        }
    }
}

/// One requested transition. Built per request, never persisted; the remote
/// record is the durable state.
#[derive(Debug, Clone)]
pub struct AssetOperationRequest {
    pub operation: Operation,
    pub asset_tag: String,
    pub target_subject_id: Option<u64>,
    pub note: Option<String>,
}

/// Successful outcome returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReceipt {
    pub operation: Operation,
    pub asset_tag: String,
    pub asset_name: String,
    pub new_status: AssetStatus,
    pub holder_id: Option<u64>,
    pub message: String,
}

/// The transaction coordinator. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Coordinator {
    inventory: Arc<dyn InventoryApi>,
    limiter: Arc<RateLimiter>,
    audit: AuditLog,
    retry: RetryConfig,
    max_code_len: usize,
    tag_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Coordinator {
    pub fn new(
        inventory: Arc<dyn InventoryApi>,
        limiter: Arc<RateLimiter>,
        audit: AuditLog,
        retry: RetryConfig,
        max_code_len: usize,
    ) -> Self {
        Self {
            inventory,
            limiter,
            audit,
            retry,
            max_code_len,
            tag_locks: Arc::new(DashMap::new()),
        }
    }

    /// Execute one asset operation for an authenticated session.
    ///
    /// Exactly one audit event records the outcome; a rate-limit denial is
    /// audited by the limiter instead and produces no operation event.
    pub async fn execute(
        &self,
        session: &Session,
        request: AssetOperationRequest,
        client_ip_hash: Option<String>,
    ) -> EngineResult<OperationReceipt> {
        let started = Instant::now();
        let action_name = audit_action(request.operation, false);

        // Precondition 1: session valid and authorized for this operation.
        if !session.is_authenticated() {
            self.audit.record(
                AuditEvent::new(action_name, AuditResult::Denied)
                    .target(&request.asset_tag)
                    .detail("no authenticated session")
                    .client_ip_hash(client_ip_hash),
            );
            metrics::record_operation(request.operation.as_str(), "denied", started);
            return Err(EngineError::Unauthenticated);
        }

        let asset_tag = validate_code(&request.asset_tag, self.max_code_len).map_err(|e| {
            self.audit.record(
                AuditEvent::new(action_name, AuditResult::Denied)
                    .actor(session.subject_id)
                    .detail("asset tag failed validation")
                    .client_ip_hash(client_ip_hash.clone()),
            );
            metrics::record_operation(request.operation.as_str(), "denied", started);
            e
        })?;
        let note = match &request.note {
            Some(raw) => validate_note(raw, MAX_NOTE_LEN).map_err(|e| {
                self.audit.record(
                    AuditEvent::new(action_name, AuditResult::Denied)
                        .actor(session.subject_id)
                        .target(&asset_tag)
                        .detail("note failed validation")
                        .client_ip_hash(client_ip_hash.clone()),
                );
                metrics::record_operation(request.operation.as_str(), "denied", started);
                e
            })?,
            None => default_note(request.operation),
        };

        if request.operation == Operation::Transfer {
            match request.target_subject_id {
                None => {
                    self.audit.record(
                        AuditEvent::new(action_name, AuditResult::Denied)
                            .actor(session.subject_id)
                            .target(&asset_tag)
                            .detail("transfer without target")
                            .client_ip_hash(client_ip_hash),
                    );
                    metrics::record_operation(request.operation.as_str(), "denied", started);
                    return Err(EngineError::Validation("transfer requires a target user".into()));
                }
                Some(target) if target == session.subject_id => {
                    self.audit.record(
                        AuditEvent::new(action_name, AuditResult::Denied)
                            .actor(session.subject_id)
                            .target(&asset_tag)
                            .detail("transfer to self")
                            .client_ip_hash(client_ip_hash),
                    );
                    metrics::record_operation(request.operation.as_str(), "denied", started);
                    return Err(EngineError::Validation("cannot transfer to yourself".into()));
                }
                Some(_) => {}
            }
        }

        // Precondition 2: admission control per (actor, operation).
        let identity = format!("user:{}", session.subject_id);
        match self
            .limiter
            .admit(&identity, request.operation.rate_limit_action())
        {
            Decision::Allow => {}
            Decision::Deny { retry_after } => {
                metrics::record_operation(request.operation.as_str(), "rate_limited", started);
                return Err(EngineError::RateLimited { retry_after });
            }
        }

        // Precondition 3 onward touches the remote. Run it on a detached
        // task: if the client disconnects mid-operation the commit and its
        // audit record still complete.
        let this = self.clone();
        let actor = session.subject_id;
        let elevated = session.elevated;
        let target = request.target_subject_id;
        let operation = request.operation;
        let task_tag = asset_tag.clone();
        let outcome = tokio::spawn(async move {
            this.run_transition(operation, task_tag, actor, elevated, target, note, client_ip_hash, started)
                .await
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Operation task failed");
            EngineError::RemoteUnavailable {
                retryable: false,
                detail: "internal task failure".into(),
            }
        })?;

        outcome
    }

    /// The serialized transition: resolve, precondition, re-validate,
    /// commit, verify, audit.
    #[allow(clippy::too_many_arguments)]
    async fn run_transition(
        &self,
        operation: Operation,
        asset_tag: String,
        actor: u64,
        elevated: bool,
        target: Option<u64>,
        note: String,
        client_ip_hash: Option<String>,
        started: Instant,
    ) -> EngineResult<OperationReceipt> {
        let lock = self
            .tag_locks
            .entry(asset_tag.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let result = self
            .transition_locked(operation, &asset_tag, actor, elevated, target, &note)
            .await;

        // One audit event per execution, success or failure.
        let override_used = matches!(&result, Ok((_, true)));
        let action = audit_action(operation, override_used);
        match &result {
            Ok((receipt, _)) => {
                self.audit.record(
                    AuditEvent::new(action, AuditResult::Success)
                        .actor(actor)
                        .target(&receipt.asset_tag)
                        .detail(receipt.message.clone())
                        .client_ip_hash(client_ip_hash),
                );
                metrics::record_operation(operation.as_str(), "success", started);
            }
            Err(e) => {
                let audit_result = match e {
                    EngineError::RemoteUnavailable { .. } => AuditResult::Error,
                    _ => AuditResult::Denied,
                };
                self.audit.record(
                    AuditEvent::new(action, audit_result)
                        .actor(actor)
                        .target(&asset_tag)
                        .detail(e.reason_code())
                        .client_ip_hash(client_ip_hash),
                );
                let outcome = match audit_result {
                    AuditResult::Error => "error",
                    _ => "denied",
                };
                metrics::record_operation(operation.as_str(), outcome, started);
            }
        }

        result.map(|(receipt, _)| receipt)
    }

    async fn transition_locked(
        &self,
        operation: Operation,
        asset_tag: &str,
        actor: u64,
        elevated: bool,
        target: Option<u64>,
        note: &str,
    ) -> EngineResult<(OperationReceipt, bool)> {
        // Resolve the tag (precondition 3).
        let current = self.fetch_asset(asset_tag).await?;
        let override_checkin = check_transition(operation, &current, actor, elevated, target)?;

        // Narrow the race window: re-read immediately before committing and
        // treat any movement as a conflict, not corruption.
        let fresh = self.fetch_asset(asset_tag).await?;
        if fresh.status != current.status || fresh.holder_id != current.holder_id {
            return Err(EngineError::RemoteConflict {
                asset_tag: asset_tag.to_string(),
                detail: "asset state changed before commit".into(),
            });
        }

        // Commit. The remote's answer is authoritative.
        let asset_id = fresh.id;
        let commit = match operation {
            Operation::Checkout => {
                let inv = self.inventory.clone();
                let note = note.to_string();
                self.with_retry(move || {
                    let inv = inv.clone();
                    let note = note.clone();
                    async move { inv.checkout(asset_id, actor, &note).await }
                })
                .await
            }
            Operation::Checkin => {
                let inv = self.inventory.clone();
                let note = note.to_string();
                self.with_retry(move || {
                    let inv = inv.clone();
                    let note = note.clone();
                    async move { inv.checkin(asset_id, &note).await }
                })
                .await
            }
            Operation::Transfer => {
                let to = target.expect("transfer target checked in execute");
                let inv = self.inventory.clone();
                let note = note.to_string();
                self.with_retry(move || {
                    let inv = inv.clone();
                    let note = note.clone();
                    async move { inv.transfer(asset_id, actor, to, &note).await }
                })
                .await
            }
        };
        commit.map_err(|e| engine_error_for(asset_tag, e))?;

        // Verify the transition is reflected. An unverifiable commit is not
        // rolled back (the remote acked it); the receipt says so.
        let expectation = match operation {
            Operation::Checkout => Some(actor),
            Operation::Checkin => None,
            Operation::Transfer => target,
        };
        let prev_holder = fresh.holder_id;
        match self.fetch_asset(asset_tag).await {
            Ok(after) => {
                if after.holder_id != expectation {
                    return Err(EngineError::RemoteConflict {
                        asset_tag: asset_tag.to_string(),
                        detail: "commit not reflected by the remote record".into(),
                    });
                }
                Ok((
                    build_receipt(operation, after, prev_holder, override_checkin),
                    override_checkin,
                ))
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    asset_tag = %asset_tag,
                    error = %e,
                    "Commit acknowledged but verification read failed"
                );
                let mut receipt = build_receipt(operation, fresh, prev_holder, override_checkin);
                receipt.new_status = expected_status(operation);
                receipt.holder_id = expectation;
                receipt.message = format!("{} (confirmation delayed)", receipt.message);
                Ok((receipt, override_checkin))
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_asset(&self, tag: &str) -> EngineResult<AssetState> {
        let inv = self.inventory.clone();
        let tag_owned = tag.to_string();
        self.with_retry(move || {
            let inv = inv.clone();
            let tag = tag_owned.clone();
            async move { inv.get_asset(&tag).await }
        })
        .await
        .map_err(|e| engine_error_for(tag, e))
    }

    /// Bounded retry with jittered backoff. Only transient failures retry;
    /// conflicts and terminal API errors surface immediately.
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, InventoryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InventoryError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay =
                        calculate_backoff(attempt, self.retry.base_delay_ms, self.retry.max_delay_ms);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient remote failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Check a transition against the asset's current remote state. Returns
/// whether the elevated checkin-override path applies.
fn check_transition(
    operation: Operation,
    state: &AssetState,
    actor: u64,
    elevated: bool,
    target: Option<u64>,
) -> EngineResult<bool> {
    let tag = state.asset_tag.clone();
    match operation {
        Operation::Checkout => match state.status {
            AssetStatus::Available => Ok(false),
            AssetStatus::CheckedOut if state.is_held_by(actor) => {
                Err(EngineError::InvalidTransition {
                    asset_tag: tag,
                    detail: "already checked out to you".into(),
                })
            }
            AssetStatus::CheckedOut => Err(EngineError::RemoteConflict {
                asset_tag: tag,
                detail: format!(
                    "already checked out to {}",
                    state.holder_name.as_deref().unwrap_or("another user")
                ),
            }),
            AssetStatus::Unknown => Err(EngineError::InvalidTransition {
                asset_tag: tag,
                detail: "asset is not deployable".into(),
            }),
        },
        Operation::Checkin => match state.status {
            AssetStatus::CheckedOut if state.is_held_by(actor) => Ok(false),
            AssetStatus::CheckedOut if elevated => Ok(true),
            AssetStatus::CheckedOut => Err(EngineError::InvalidTransition {
                asset_tag: tag,
                detail: "held by another user".into(),
            }),
            _ => Err(EngineError::InvalidTransition {
                asset_tag: tag,
                detail: "asset is not checked out".into(),
            }),
        },
        Operation::Transfer => match state.status {
            AssetStatus::CheckedOut if state.is_held_by(actor) => {
                debug_assert!(target.is_some());
                Ok(false)
            }
            AssetStatus::CheckedOut => Err(EngineError::InvalidTransition {
                asset_tag: tag,
                detail: "only the current holder can transfer".into(),
            }),
            _ => Err(EngineError::InvalidTransition {
                asset_tag: tag,
                detail: "asset is not checked out".into(),
            }),
        },
    }
}

fn engine_error_for(asset_tag: &str, e: InventoryError) -> EngineError {
    match e {
        InventoryError::Conflict(detail) => EngineError::RemoteConflict {
            asset_tag: asset_tag.to_string(),
            detail,
        },
        other => other.into(),
    }
}

fn audit_action(operation: Operation, override_used: bool) -> &'static str {
    match (operation, override_used) {
        (Operation::Checkout, _) => "asset.checkout",
        (Operation::Checkin, false) => "asset.checkin",
        (Operation::Checkin, true) => "asset.checkin.override",
        (Operation::Transfer, _) => "asset.transfer",
    }
}

fn default_note(operation: Operation) -> String {
    match operation {
        Operation::Checkout => "Checked out via kiosk".to_string(),
        Operation::Checkin => "Checked in via kiosk".to_string(),
        Operation::Transfer => "Transferred via kiosk".to_string(),
    }
}

fn expected_status(operation: Operation) -> AssetStatus {
    match operation {
        Operation::Checkout | Operation::Transfer => AssetStatus::CheckedOut,
        Operation::Checkin => AssetStatus::Available,
    }
}

fn build_receipt(
    operation: Operation,
    state: AssetState,
    prev_holder: Option<u64>,
    override_checkin: bool,
) -> OperationReceipt {
    let display = state.display_name().to_string();
    let message = match operation {
        Operation::Checkout => format!("Checked out {} (tag {})", display, state.asset_tag),
        Operation::Checkin if override_checkin => format!(
            "Checked in {} (tag {}) on behalf of user {}",
            display,
            state.asset_tag,
            prev_holder.map(|id| id.to_string()).unwrap_or_else(|| "unknown".into())
        ),
        Operation::Checkin => format!("Checked in {} (tag {})", display, state.asset_tag),
        Operation::Transfer => format!("Transferred {} (tag {})", display, state.asset_tag),
    };
    OperationReceipt {
        operation,
        asset_tag: state.asset_tag.clone(),
        asset_name: display,
        new_status: state.status,
        holder_id: state.holder_id,
        message,
    }
}
