//! Session state machine gating access to the payment surface.
//!
//! Password, then an optional second factor, with progressive lockout after
//! repeated failures. Holds no business data; it only decides whether a
//! caller may reach the engine and with which capabilities.

use crate::domain::ports::CredentialVerifierRef;
use crate::domain::session::{AuthSession, AuthStep, Capability};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

pub struct AuthenticationGuard {
    verifier: CredentialVerifierRef,
    sessions: DashMap<Uuid, AuthSession>,
    by_user: DashMap<String, Uuid>,
    max_failed_attempts: u32,
    lockout: chrono::Duration,
    idle: chrono::Duration,
}

impl AuthenticationGuard {
    pub fn new(
        verifier: CredentialVerifierRef,
        max_failed_attempts: u32,
        lockout: chrono::Duration,
        idle: chrono::Duration,
    ) -> Self {
        Self {
            verifier,
            sessions: DashMap::new(),
            by_user: DashMap::new(),
            max_failed_attempts,
            lockout,
            idle,
        }
    }

    /// Returns the user's current session, creating one on first access.
    pub fn begin(&self, user_id: &str, now: DateTime<Utc>) -> AuthSession {
        if let Some(existing) = self.by_user.get(user_id) {
            if let Some(session) = self.sessions.get(&existing) {
                return session.clone();
            }
        }
        let session = AuthSession::new(user_id, now);
        self.by_user.insert(user_id.to_string(), session.id);
        self.sessions.insert(session.id, session.clone());
        session
    }

    pub fn session(&self, session_id: Uuid) -> Option<AuthSession> {
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    /// First factor. Correct passwords advance the session; failures count
    /// toward lockout. Attempts while locked are rejected without counting.
    pub async fn submit_password(
        &self,
        session_id: Uuid,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthStep> {
        let (user_id, _) = self.checked_session(session_id, now)?;

        let correct = self.verifier.verify_password(&user_id, password).await?;
        if !correct {
            return self.record_failure(session_id, now);
        }

        let requires_2fa = self.verifier.requires_second_factor(&user_id).await?;
        let capabilities = if requires_2fa {
            None
        } else {
            Some(self.verifier.capabilities(&user_id).await?)
        };

        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(EngineError::SessionNotFound)?;
        session.failed_attempts = 0;
        session.last_activity = now;
        session.step = if requires_2fa {
            AuthStep::AwaitingSecondFactor
        } else {
            AuthStep::Authenticated
        };
        if let Some(capabilities) = capabilities {
            session.capabilities = capabilities;
        }
        tracing::info!(user_id = %session.user_id, step = ?session.step, "password accepted");
        Ok(session.step)
    }

    /// Second factor. A failure that does not trigger lockout sends the
    /// session back to the first factor.
    pub async fn submit_second_factor(
        &self,
        session_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthStep> {
        let (user_id, step) = self.checked_session(session_id, now)?;
        if step != AuthStep::AwaitingSecondFactor {
            return Err(EngineError::Validation(
                "second factor not expected".to_string(),
            ));
        }

        let correct = self.verifier.verify_second_factor(&user_id, code).await?;
        if !correct {
            let result = self.record_failure(session_id, now);
            if let Some(mut session) = self.sessions.get_mut(&session_id) {
                // Re-authentication restarts at the first factor.
                session.step = AuthStep::AwaitingPassword;
            }
            return result;
        }

        let capabilities = self.verifier.capabilities(&user_id).await?;
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(EngineError::SessionNotFound)?;
        session.failed_attempts = 0;
        session.last_activity = now;
        session.step = AuthStep::Authenticated;
        session.capabilities = capabilities;
        tracing::info!(user_id = %session.user_id, "second factor accepted");
        Ok(AuthStep::Authenticated)
    }

    /// The session must be authenticated and not idle-expired. Touches the
    /// session's activity clock.
    pub fn authenticated(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<AuthSession> {
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(EngineError::SessionNotFound)?;
        if session.step != AuthStep::Authenticated {
            return Err(EngineError::Unauthenticated);
        }
        if now - session.last_activity > self.idle {
            let user_id = session.user_id.clone();
            drop(session);
            self.sessions.remove(&session_id);
            self.by_user.remove(&user_id);
            return Err(EngineError::SessionNotFound);
        }
        session.last_activity = now;
        Ok(session.clone())
    }

    /// Gate for engine entry points: an authenticated session holding the
    /// required capability.
    pub fn require_capability(
        &self,
        session_id: Uuid,
        capability: Capability,
        now: DateTime<Utc>,
    ) -> Result<AuthSession> {
        let session = self.authenticated(session_id, now)?;
        if !session.has_capability(capability) {
            return Err(EngineError::MissingCapability(
                capability.as_str().to_string(),
            ));
        }
        Ok(session)
    }

    pub fn logout(&self, session_id: Uuid) {
        if let Some((_, session)) = self.sessions.remove(&session_id) {
            self.by_user.remove(&session.user_id);
            tracing::info!(user_id = %session.user_id, "logged out");
        }
    }

    /// Drops sessions idle past the configured TTL. Idempotent; safe to run
    /// redundantly from timers.
    pub fn expire_idle(&self, now: DateTime<Utc>) -> usize {
        let stale: Vec<(Uuid, String)> = self
            .sessions
            .iter()
            .filter(|entry| now - entry.last_activity > self.idle)
            .map(|entry| (entry.id, entry.user_id.clone()))
            .collect();
        for (id, user_id) in &stale {
            self.sessions.remove(id);
            self.by_user.remove(user_id);
        }
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "expired idle sessions");
        }
        stale.len()
    }

    /// Rejects locked sessions and clears elapsed lockouts. Returns the
    /// session's user and step for the factor handlers.
    fn checked_session(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<(String, AuthStep)> {
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(EngineError::SessionNotFound)?;
        if let Some(remaining) = session.lockout_remaining_secs(now) {
            return Err(EngineError::AccountLocked {
                remaining_secs: remaining,
            });
        }
        session.lockout_until = None;
        session.last_activity = now;
        Ok((session.user_id.clone(), session.step))
    }

    /// Failure accounting shared by both factors. Entering lockout resets
    /// the counter.
    fn record_failure(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<AuthStep> {
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(EngineError::SessionNotFound)?;
        session.failed_attempts += 1;
        if session.failed_attempts >= self.max_failed_attempts {
            session.failed_attempts = 0;
            session.lockout_until = Some(now + self.lockout);
            session.step = AuthStep::AwaitingPassword;
            tracing::warn!(user_id = %session.user_id, "account locked");
            return Err(EngineError::AccountLocked {
                remaining_secs: self.lockout.num_seconds(),
            });
        }
        tracing::info!(
            user_id = %session.user_id,
            failed_attempts = session.failed_attempts,
            "authentication failure"
        );
        Err(EngineError::InvalidCredentials)
    }
}
