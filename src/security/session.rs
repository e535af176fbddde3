//! Session issuance, validation, rotation, and revocation.
//!
//! Session identifiers and CSRF tokens are 32 bytes of OS randomness,
//! URL-safe base64 encoded. They are never derived from time or any other
//! predictable input, and a revoked identifier never becomes valid again.
//!
//! State machine: `Anonymous → Authenticated → Revoked`, with `Revoked`
//! terminal. Expiry is lazy: a stale session flips to `Revoked` the moment
//! `validate` observes it.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::audit::{unix_now, AuditEvent, AuditLog, AuditResult};
use crate::config::SessionConfig;
use crate::error::{EngineError, EngineResult};
use crate::inventory::{InventoryApi, InventoryError};
use crate::security::validate::validate_code;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated,
    Revoked,
}

/// An authenticated (or anonymous) caller context.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque high-entropy identifier. Primary key; single use, never
    /// reissued after revocation.
    pub id: String,
    pub subject_id: u64,
    pub display_name: String,
    /// Elevated callers may take the audited override paths.
    pub elevated: bool,
    pub created_at: u64,
    pub last_seen_at: u64,
    pub csrf_token: String,
    pub state: SessionState,
}

impl Session {
    /// Context for unauthenticated public endpoints. Carries no tokens and
    /// can never execute a state-changing operation.
    pub fn anonymous() -> Self {
        Self {
            id: String::new(),
            subject_id: 0,
            display_name: "anonymous".to_string(),
            elevated: false,
            created_at: unix_now(),
            last_seen_at: unix_now(),
            csrf_token: String::new(),
            state: SessionState::Anonymous,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Issues, validates, rotates, and revokes sessions.
pub struct SessionManager {
    inventory: Arc<dyn InventoryApi>,
    audit: AuditLog,
    config: SessionConfig,
    sessions: DashMap<String, Session>,
    by_subject: DashMap<u64, String>,
}

impl SessionManager {
    pub fn new(inventory: Arc<dyn InventoryApi>, audit: AuditLog, config: SessionConfig) -> Self {
        Self {
            inventory,
            audit,
            config,
            sessions: DashMap::new(),
            by_subject: DashMap::new(),
        }
    }

    /// Authenticate a badge credential against the remote identity record.
    ///
    /// On success any prior session for the same subject is revoked and a
    /// fresh session with a fresh CSRF token is issued. Every attempt,
    /// success or failure, lands in the audit trail.
    pub async fn authenticate(
        &self,
        credential: &str,
        client_ip_hash: Option<String>,
    ) -> EngineResult<Session> {
        let credential = validate_code(credential, 64).map_err(|e| {
            self.audit.record(
                AuditEvent::new("auth.sign_in", AuditResult::Denied)
                    .detail("credential failed validation")
                    .client_ip_hash(client_ip_hash.clone()),
            );
            e
        })?;

        let identity = match self.inventory.get_identity(&credential).await {
            Ok(identity) => identity,
            Err(InventoryError::IdentityNotFound) => {
                self.audit.record(
                    AuditEvent::new("auth.sign_in", AuditResult::Denied)
                        .detail("identity not found")
                        .client_ip_hash(client_ip_hash),
                );
                return Err(EngineError::Unauthenticated);
            }
            Err(e) => {
                self.audit.record(
                    AuditEvent::new("auth.sign_in", AuditResult::Error)
                        .detail(format!("identity lookup failed: {}", e))
                        .client_ip_hash(client_ip_hash),
                );
                return Err(e.into());
            }
        };

        let session = self.issue(identity.subject_id, identity.name, identity.elevated);
        self.audit.record(
            AuditEvent::new("auth.sign_in", AuditResult::Success)
                .actor(session.subject_id)
                .client_ip_hash(client_ip_hash),
        );
        Ok(session)
    }

    /// Issue a fresh session for a subject, revoking any prior one
    /// (rotation-on-privilege-change).
    fn issue(&self, subject_id: u64, display_name: String, elevated: bool) -> Session {
        if let Some((_, old_id)) = self.by_subject.remove(&subject_id) {
            self.revoke(&old_id);
        }

        let now = unix_now();
        let session = Session {
            id: generate_token(),
            subject_id,
            display_name,
            elevated,
            created_at: now,
            last_seen_at: now,
            csrf_token: generate_token(),
            state: SessionState::Authenticated,
        };
        self.by_subject.insert(subject_id, session.id.clone());
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Validate a presented session id, and for state-changing requests the
    /// presented CSRF token. Applies lazy expiry and refreshes
    /// `last_seen_at` with a latest-wins rule.
    pub fn validate(&self, session_id: &str, csrf_token: Option<&str>) -> EngineResult<Session> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or(EngineError::Unauthenticated)?;

        if entry.state != SessionState::Authenticated {
            return Err(EngineError::Unauthenticated);
        }

        let now = unix_now();
        let inactive_for = now.saturating_sub(entry.last_seen_at);
        let age = now.saturating_sub(entry.created_at);
        if inactive_for > self.config.inactivity_secs || age > self.config.absolute_lifetime_secs {
            entry.state = SessionState::Revoked;
            entry.csrf_token.clear();
            self.by_subject.remove(&entry.subject_id);
            return Err(EngineError::SessionExpired);
        }

        if let Some(presented) = csrf_token {
            if !constant_time_eq(presented, &entry.csrf_token) {
                return Err(EngineError::CsrfMismatch);
            }
        }

        // Requests within one session are not ordered; never move the
        // activity marker backwards.
        entry.last_seen_at = entry.last_seen_at.max(now);

        Ok(entry.clone())
    }

    /// Reissue id and CSRF token for a live session, revoking the old id.
    pub fn rotate(&self, session_id: &str) -> EngineResult<Session> {
        let current = self.validate(session_id, None)?;
        self.revoke(session_id);
        Ok(self.issue(current.subject_id, current.display_name, current.elevated))
    }

    /// Revoke a session. Terminal: the id and its CSRF token are dead from
    /// this point on, regardless of remaining lifetime.
    pub fn revoke(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.state = SessionState::Revoked;
                entry.csrf_token.clear();
                self.by_subject.remove(&entry.subject_id);
                true
            }
            None => false,
        }
    }

    /// Number of live sessions (expired ones may still be counted until
    /// their next validate).
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.state == SessionState::Authenticated)
            .count()
    }

    /// Shift a session's clock into the past. Test hook for expiry paths.
    #[cfg(test)]
    pub(crate) fn backdate(&self, session_id: &str, created_secs: u64, last_seen_secs: u64) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.created_at = entry.created_at.saturating_sub(created_secs);
            entry.last_seen_at = entry.last_seen_at.saturating_sub(last_seen_secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::inventory::{AssetState, RemoteIdentity};
    use async_trait::async_trait;

    struct StaticIdentities;

    #[async_trait]
    impl InventoryApi for StaticIdentities {
        async fn get_identity(&self, credential: &str) -> Result<RemoteIdentity, InventoryError> {
            match credential {
                "1000" => Ok(RemoteIdentity {
                    subject_id: 7,
                    name: "Sam Doe".into(),
                    elevated: false,
                }),
                _ => Err(InventoryError::IdentityNotFound),
            }
        }

        async fn get_asset(&self, tag: &str) -> Result<AssetState, InventoryError> {
            Err(InventoryError::AssetNotFound(tag.into()))
        }

        async fn checkout(&self, _: u64, _: u64, _: &str) -> Result<(), InventoryError> {
            unimplemented!()
        }

        async fn checkin(&self, _: u64, _: &str) -> Result<(), InventoryError> {
            unimplemented!()
        }

        async fn transfer(&self, _: u64, _: u64, _: u64, _: &str) -> Result<(), InventoryError> {
            unimplemented!()
        }

        async fn assets_for_holder(&self, _: u64) -> Result<Vec<AssetState>, InventoryError> {
            Ok(Vec::new())
        }
    }

    fn manager() -> (SessionManager, MemorySink) {
        let sink = MemorySink::new();
        let audit = AuditLog::new(Box::new(sink.clone()));
        (
            SessionManager::new(Arc::new(StaticIdentities), audit, SessionConfig::default()),
            sink,
        )
    }

    #[tokio::test]
    async fn test_authenticate_issues_high_entropy_tokens() {
        let (manager, _) = manager();
        let a = manager.authenticate("1000", None).await.unwrap();
        assert!(a.is_authenticated());
        assert!(a.id.len() >= 40);
        assert!(a.csrf_token.len() >= 40);
        assert_ne!(a.id, a.csrf_token);
    }

    #[tokio::test]
    async fn test_unknown_credential_is_denied_and_audited() {
        let (manager, sink) = manager();
        let err = manager.authenticate("9999", None).await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthenticated));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "auth.sign_in");
        assert_eq!(events[0].result, AuditResult::Denied);
    }

    #[tokio::test]
    async fn test_relogin_revokes_prior_session() {
        let (manager, _) = manager();
        let first = manager.authenticate("1000", None).await.unwrap();
        let second = manager.authenticate("1000", None).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_ne!(first.csrf_token, second.csrf_token);
        assert!(manager.validate(&first.id, None).is_err());
        assert!(manager.validate(&second.id, None).is_ok());
    }

    #[tokio::test]
    async fn test_csrf_checked_in_constant_time_path() {
        let (manager, _) = manager();
        let session = manager.authenticate("1000", None).await.unwrap();

        assert!(manager
            .validate(&session.id, Some(&session.csrf_token))
            .is_ok());
        let err = manager.validate(&session.id, Some("wrong-token")).unwrap_err();
        assert!(matches!(err, EngineError::CsrfMismatch));
    }

    #[tokio::test]
    async fn test_csrf_dies_immediately_on_revoke() {
        let (manager, _) = manager();
        let session = manager.authenticate("1000", None).await.unwrap();

        assert!(manager.revoke(&session.id));
        // Well before any expiry, the token must already be dead.
        let err = manager
            .validate(&session.id, Some(&session.csrf_token))
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_revoked_is_terminal() {
        let (manager, _) = manager();
        let session = manager.authenticate("1000", None).await.unwrap();
        manager.revoke(&session.id);
        assert!(manager.rotate(&session.id).is_err());
        assert!(manager.validate(&session.id, None).is_err());
    }

    #[tokio::test]
    async fn test_inactivity_expiry() {
        let (manager, _) = manager();
        let session = manager.authenticate("1000", None).await.unwrap();

        // 31 minutes idle against a 30 minute timeout.
        manager.backdate(&session.id, 31 * 60, 31 * 60);
        let err = manager.validate(&session.id, None).unwrap_err();
        assert!(matches!(err, EngineError::SessionExpired));
        // Lazy expiry is terminal too.
        assert!(matches!(
            manager.validate(&session.id, None).unwrap_err(),
            EngineError::Unauthenticated
        ));
    }

    #[tokio::test]
    async fn test_absolute_lifetime_expiry() {
        let (manager, _) = manager();
        let session = manager.authenticate("1000", None).await.unwrap();

        // Recently active, but created 13 hours ago against a 12 hour cap.
        manager.backdate(&session.id, 13 * 60 * 60, 0);
        let err = manager.validate(&session.id, None).unwrap_err();
        assert!(matches!(err, EngineError::SessionExpired));
    }

    #[tokio::test]
    async fn test_rotate_invalidates_old_id() {
        let (manager, _) = manager();
        let session = manager.authenticate("1000", None).await.unwrap();
        let rotated = manager.rotate(&session.id).unwrap();

        assert_ne!(session.id, rotated.id);
        assert_ne!(session.csrf_token, rotated.csrf_token);
        assert!(manager.validate(&session.id, None).is_err());
        assert!(manager.validate(&rotated.id, None).is_ok());
    }

    #[test]
    fn test_anonymous_session_cannot_authenticate_actions() {
        let anon = Session::anonymous();
        assert!(!anon.is_authenticated());
        assert!(anon.csrf_token.is_empty());
    }
}
