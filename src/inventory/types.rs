//! Inventory domain types and error definitions.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EngineError;

/// Remote asset status as this engine understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Available,
    CheckedOut,
    /// The remote record exists but its status did not map cleanly.
    Unknown,
}

/// Read-through view of a remote asset record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetState {
    /// Remote numeric id, needed for transition endpoints.
    pub id: u64,
    pub asset_tag: String,
    pub name: Option<String>,
    pub status: AssetStatus,
    pub holder_id: Option<u64>,
    pub holder_name: Option<String>,
}

impl AssetState {
    pub fn is_held_by(&self, subject_id: u64) -> bool {
        self.holder_id == Some(subject_id)
    }

    /// Human-facing label: name if the record has one, else the tag.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.asset_tag,
        }
    }
}

/// Identity resolved from a badge credential by the remote service.
#[derive(Debug, Clone)]
pub struct RemoteIdentity {
    pub subject_id: u64,
    pub name: String,
    pub elevated: bool,
}

/// Errors from the remote inventory boundary.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Could not reach the remote, or it answered 5xx/429. Transient.
    #[error("remote inventory unavailable: {0}")]
    Unavailable(String),

    /// The remote did not answer within the configured timeout. Transient.
    #[error("remote inventory timeout after {0:?}")]
    Timeout(Duration),

    /// The remote rejected the proposed transition. Authoritative; the
    /// caller's view of the asset was stale.
    #[error("remote rejected transition: {0}")]
    Conflict(String),

    /// No asset record for the tag.
    #[error("asset not found: {0}")]
    AssetNotFound(String),

    /// No identity record for the credential.
    #[error("identity not found")]
    IdentityNotFound,

    /// Terminal remote error (auth failure, malformed request, unexpected
    /// payload). Not retried.
    #[error("remote API error (status {status}): {detail}")]
    Api { status: u16, detail: String },

    /// Client-side configuration problem (bad base URL).
    #[error("inventory client configuration: {0}")]
    Configuration(String),
}

impl InventoryError {
    /// Whether a retry can plausibly change the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InventoryError::Unavailable(_) | InventoryError::Timeout(_)
        )
    }
}

impl From<InventoryError> for EngineError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::Unavailable(detail) => EngineError::RemoteUnavailable {
                retryable: true,
                detail,
            },
            InventoryError::Timeout(after) => EngineError::RemoteUnavailable {
                retryable: true,
                detail: format!("timeout after {:?}", after),
            },
            InventoryError::Conflict(detail) => EngineError::RemoteConflict {
                asset_tag: String::new(),
                detail,
            },
            InventoryError::AssetNotFound(tag) => EngineError::NotFound(tag),
            InventoryError::IdentityNotFound => EngineError::Unauthenticated,
            InventoryError::Api { status, detail } => EngineError::RemoteUnavailable {
                retryable: false,
                detail: format!("status {}: {}", status, detail),
            },
            InventoryError::Configuration(detail) => EngineError::RemoteUnavailable {
                retryable: false,
                detail,
            },
        }
    }
}

/// The remote inventory surface the engine consumes.
///
/// The remote has no first-class transfer; implementations approximate it
/// as release + reassign. The `from` subject lets them roll the release
/// back when the reassignment is rejected.
#[async_trait]
pub trait InventoryApi: Send + Sync {
    async fn get_identity(&self, credential: &str) -> Result<RemoteIdentity, InventoryError>;

    async fn get_asset(&self, tag: &str) -> Result<AssetState, InventoryError>;

    async fn checkout(
        &self,
        asset_id: u64,
        subject_id: u64,
        note: &str,
    ) -> Result<(), InventoryError>;

    async fn checkin(&self, asset_id: u64, note: &str) -> Result<(), InventoryError>;

    async fn transfer(
        &self,
        asset_id: u64,
        from_subject: u64,
        to_subject: u64,
        note: &str,
    ) -> Result<(), InventoryError>;

    async fn assets_for_holder(&self, subject_id: u64) -> Result<Vec<AssetState>, InventoryError>;
}
