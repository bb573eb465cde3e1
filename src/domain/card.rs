use crate::error::EngineError;
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub, SubAssign};

pub type CardId = String;

/// Represents a monetary value with 4 decimal places precision.
///
/// This is a wrapper around `rust_decimal::Decimal` to enforce domain-specific rules
/// and provide type safety for financial calculations.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

/// Represents a positive monetary amount for transactions.
///
/// Ensures that transaction amounts are always positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, EngineError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(EngineError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    PendingActivation,
    Active,
    Inactive,
    Blocked,
    Expired,
}

/// Scope of a geographic usage rule, from least to most specific.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum GeoScope {
    Country,
    Region,
    City,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct GeoRule {
    pub scope: GeoScope,
    pub value: String,
    pub allowed: bool,
}

/// Where, when and with whom a card may be used.
///
/// An explicitly empty `allowed_categories` list means nothing is allowed;
/// callers that want no category restriction must populate the full list.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct UsageRestrictions {
    pub allowed_categories: Vec<String>,
    /// Merchant names, matched case-insensitively.
    pub restricted_merchants: Vec<String>,
    /// Days of week the card may be used, 0 = Sunday through 6 = Saturday.
    pub allowed_days: Vec<u8>,
    /// Start of the same-day `[start, end)` usage window, if any.
    pub allowed_time_start: Option<NaiveTime>,
    /// End of the usage window. Overnight wraparound is not supported.
    pub allowed_time_end: Option<NaiveTime>,
    pub geo_rules: Vec<GeoRule>,
}

impl UsageRestrictions {
    /// A policy allowing the given categories on every day of the week,
    /// with no merchant, time or geographic rules.
    pub fn allowing(categories: &[&str]) -> Self {
        Self {
            allowed_categories: categories.iter().map(|c| c.to_string()).collect(),
            restricted_merchants: Vec::new(),
            allowed_days: (0..=6).collect(),
            allowed_time_start: None,
            allowed_time_end: None,
            geo_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SecuritySettings {
    pub requires_pin: bool,
    pub requires_2fa: bool,
    pub allow_online: bool,
    pub allow_international: bool,
    /// Amounts above this are routed to the approval queue.
    pub approval_threshold: Decimal,
    pub max_daily: Decimal,
    pub max_monthly: Decimal,
    /// Approvers allowed to resolve this card's approval requests.
    /// Empty means any holder of the approve-transactions capability.
    pub allowed_approver_ids: Vec<String>,
}

/// A payment card and its policies.
///
/// Invariant: `0 <= available_balance <= credit_limit`. The balance is
/// mutated exclusively through the limit tracker's serialized per-card path.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Card {
    pub id: CardId,
    pub status: CardStatus,
    pub credit_limit: Balance,
    pub available_balance: Balance,
    /// Country used to classify transactions as international.
    pub billing_country: String,
    /// Minutes east of UTC; daily and monthly spend windows roll at this
    /// local midnight and month boundary.
    pub billing_utc_offset_minutes: i32,
    pub security: SecuritySettings,
    pub restrictions: UsageRestrictions,
}

impl Card {
    pub fn billing_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.billing_utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}
