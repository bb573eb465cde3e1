use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A named permission a session may hold.
///
/// Engine entry points declare the capability they require and check set
/// membership, instead of scattering permission-string comparisons through
/// callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    AuthorizePayments,
    ApproveTransactions,
    ManageCards,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizePayments => "authorize_payments",
            Self::ApproveTransactions => "approve_transactions",
            Self::ManageCards => "manage_cards",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStep {
    AwaitingPassword,
    AwaitingSecondFactor,
    Authenticated,
}

/// Authentication state for one user of the payment surface.
///
/// Holds no business data; it only gates access to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub id: Uuid,
    pub user_id: String,
    pub step: AuthStep,
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    /// Granted on successful authentication.
    pub capabilities: HashSet<Capability>,
    pub last_activity: DateTime<Utc>,
}

impl AuthSession {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            step: AuthStep::AwaitingPassword,
            failed_attempts: 0,
            lockout_until: None,
            capabilities: HashSet::new(),
            last_activity: now,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }

    /// Seconds until the lockout lifts, if currently locked.
    pub fn lockout_remaining_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.lockout_until
            .filter(|until| now < *until)
            .map(|until| (until - now).num_seconds())
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Identity used when this session resolves approval requests.
    pub fn approver(&self) -> Approver {
        Approver {
            id: self.user_id.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

/// Identity acting on an approval request.
#[derive(Debug, Clone, PartialEq)]
pub struct Approver {
    pub id: String,
    pub capabilities: HashSet<Capability>,
}
