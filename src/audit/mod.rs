//! Append-only audit trail.
//!
//! Every authentication attempt, rate-limit denial, and asset operation
//! outcome produces exactly one event. Events flow through an unbounded
//! channel into a background writer so the hot path never blocks on disk;
//! a failed write degrades to an error-level diagnostic and a metric, never
//! to the caller. No update or delete API exists.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::observability::metrics;

/// Outcome of the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Denied,
    /// Infrastructure failure while deciding, e.g. the limiter store being
    /// unreachable. Distinguishable from an ordinary denial.
    Error,
}

/// One immutable audit record.
///
/// Only identifiers and hashes go in here; raw secrets, session tokens, and
/// unhashed client addresses never do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub unix_ts: u64,
    pub actor_id: Option<u64>,
    pub action: String,
    pub target: Option<String>,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip_hash: Option<String>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, result: AuditResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            unix_ts: unix_now(),
            actor_id: None,
            action: action.into(),
            target: None,
            result,
            detail: None,
            client_ip_hash: None,
        }
    }

    pub fn actor(mut self, actor_id: u64) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn client_ip_hash(mut self, hash: Option<String>) -> Self {
        self.client_ip_hash = hash;
        self
    }
}

/// Current unix timestamp in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Hash a client address for the audit trail. Truncated salted SHA-256;
/// enough to correlate events, not enough to recover the address.
pub fn hash_client_ip(ip: IpAddr, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(ip.to_string().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Destination for audit records. Implementations must tolerate concurrent
/// appends from the single writer task and flush per event (at-least-once:
/// duplicates are acceptable, silent loss on a live path is not).
pub trait AuditSink: Send {
    fn append(&mut self, event: &AuditEvent) -> std::io::Result<()>;
}

/// JSON-lines file sink, opened in append mode.
pub struct JsonlFileSink {
    writer: BufWriter<File>,
}

impl JsonlFileSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl AuditSink for JsonlFileSink {
    fn append(&mut self, event: &AuditEvent) -> std::io::Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// In-memory sink for tests and embedded use.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit memory sink poisoned").clone()
    }
}

impl AuditSink for MemorySink {
    fn append(&mut self, event: &AuditEvent) -> std::io::Result<()> {
        self.events
            .lock()
            .expect("audit memory sink poisoned")
            .push(event.clone());
        Ok(())
    }
}

/// Cheap-to-clone handle for recording audit events.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditLog {
    /// Spawn the writer task around a sink. Must be called inside a tokio
    /// runtime.
    pub fn new(mut sink: Box<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.append(&event) {
                    metrics::record_audit_degraded();
                    tracing::error!(
                        error = %e,
                        action = %event.action,
                        "Audit write degraded, event only in logs"
                    );
                }
            }
        });
        Self { tx }
    }

    /// Record an event. Never fails toward the caller; if the writer is
    /// gone the event is emitted as a diagnostic instead.
    pub fn record(&self, event: AuditEvent) {
        tracing::debug!(
            action = %event.action,
            result = ?event.result,
            actor = ?event.actor_id,
            target = ?event.target,
            "audit"
        );
        if let Err(e) = self.tx.send(event) {
            metrics::record_audit_degraded();
            tracing::error!(
                action = %e.0.action,
                "Audit channel closed, event only in logs"
            );
        }
    }
}
