use crate::domain::card::{Amount, CardId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    InStore,
    Online,
    Recurring,
}

/// Location tag of a proposed transaction, most to least specific.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionGeo {
    pub country: String,
    pub region: String,
    pub city: String,
}

/// A proposed card transaction. Immutable once submitted.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionRequest {
    pub card_id: CardId,
    pub amount: Amount,
    pub currency: String,
    pub category: String,
    pub merchant: String,
    pub geo: TransactionGeo,
    pub timestamp: DateTime<Utc>,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case", tag = "code", content = "detail")]
pub enum DeclineReason {
    CardNotActive,
    Restriction(String),
    InsufficientFunds,
    DailyLimitExceeded,
    MonthlyLimitExceeded,
}

impl std::fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CardNotActive => write!(f, "card is not active"),
            Self::Restriction(reason) => write!(f, "restriction violation: {reason}"),
            Self::InsufficientFunds => write!(f, "insufficient funds"),
            Self::DailyLimitExceeded => write!(f, "daily spending limit exceeded"),
            Self::MonthlyLimitExceeded => write!(f, "monthly spending limit exceeded"),
        }
    }
}

/// Outcome of a single authorization call.
///
/// Produced once per request and never retracted; a later approve or reject
/// of a pending request yields a separate resolution record.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum AuthorizationDecision {
    Approved,
    Declined { reason: DeclineReason },
    PendingApproval { approval_id: Uuid },
}
