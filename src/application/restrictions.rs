//! Pure evaluation of a card's usage restrictions against a transaction.
//!
//! Checks run in a fixed order and short-circuit on the first failure:
//! category allow-list, merchant block-list, day of week, time-of-day
//! window, then geographic rules. No side effects; the same inputs always
//! yield the same outcome.

use crate::domain::card::{GeoScope, UsageRestrictions};
use crate::domain::transaction::TransactionRequest;
use chrono::{DateTime, Datelike, FixedOffset, Timelike};

/// Outcome of a restriction check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Allowed,
    Denied(RestrictionDenial),
}

impl Evaluation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestrictionDenial {
    CategoryNotAllowed(String),
    MerchantRestricted(String),
    /// Day of week, 0 = Sunday.
    DayNotAllowed(u8),
    OutsideTimeWindow,
    GeoDenied(String),
}

impl std::fmt::Display for RestrictionDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CategoryNotAllowed(category) => {
                write!(f, "category not allowed: {category}")
            }
            Self::MerchantRestricted(merchant) => {
                write!(f, "merchant restricted: {merchant}")
            }
            Self::DayNotAllowed(day) => write!(f, "card not usable on weekday {day}"),
            Self::OutsideTimeWindow => write!(f, "outside allowed time window"),
            Self::GeoDenied(location) => write!(f, "location not allowed: {location}"),
        }
    }
}

/// Evaluates `policy` against `request` at `local_now`, the current instant
/// already converted to the card's billing offset.
pub fn evaluate(
    policy: &UsageRestrictions,
    request: &TransactionRequest,
    local_now: DateTime<FixedOffset>,
) -> Evaluation {
    let denial = check_category(policy, request)
        .or_else(|| check_merchant(policy, request))
        .or_else(|| check_day(policy, local_now))
        .or_else(|| check_time_window(policy, local_now))
        .or_else(|| check_geo(policy, request));
    match denial {
        Some(denial) => Evaluation::Denied(denial),
        None => Evaluation::Allowed,
    }
}

/// An explicitly empty allow-list means nothing is allowed.
fn check_category(
    policy: &UsageRestrictions,
    request: &TransactionRequest,
) -> Option<RestrictionDenial> {
    if policy
        .allowed_categories
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&request.category))
    {
        None
    } else {
        Some(RestrictionDenial::CategoryNotAllowed(
            request.category.clone(),
        ))
    }
}

fn check_merchant(
    policy: &UsageRestrictions,
    request: &TransactionRequest,
) -> Option<RestrictionDenial> {
    if policy
        .restricted_merchants
        .iter()
        .any(|m| m.eq_ignore_ascii_case(&request.merchant))
    {
        Some(RestrictionDenial::MerchantRestricted(
            request.merchant.clone(),
        ))
    } else {
        None
    }
}

fn check_day(
    policy: &UsageRestrictions,
    local_now: DateTime<FixedOffset>,
) -> Option<RestrictionDenial> {
    let day = local_now.weekday().num_days_from_sunday() as u8;
    if policy.allowed_days.contains(&day) {
        None
    } else {
        Some(RestrictionDenial::DayNotAllowed(day))
    }
}

/// Same-day `[start, end)` window; only enforced when both ends are set.
/// Overnight wraparound is not supported.
fn check_time_window(
    policy: &UsageRestrictions,
    local_now: DateTime<FixedOffset>,
) -> Option<RestrictionDenial> {
    let (start, end) = match (policy.allowed_time_start, policy.allowed_time_end) {
        (Some(start), Some(end)) => (start, end),
        _ => return None,
    };
    let time = local_now.time().with_nanosecond(0).unwrap_or(local_now.time());
    if time >= start && time < end {
        None
    } else {
        Some(RestrictionDenial::OutsideTimeWindow)
    }
}

/// The most specific matching rule wins: city over region over country.
/// No matching rule means the location is allowed.
fn check_geo(
    policy: &UsageRestrictions,
    request: &TransactionRequest,
) -> Option<RestrictionDenial> {
    for scope in [GeoScope::City, GeoScope::Region, GeoScope::Country] {
        let value = match scope {
            GeoScope::City => &request.geo.city,
            GeoScope::Region => &request.geo.region,
            GeoScope::Country => &request.geo.country,
        };
        if let Some(rule) = policy
            .geo_rules
            .iter()
            .find(|r| r.scope == scope && r.value.eq_ignore_ascii_case(value))
        {
            if rule.allowed {
                return None;
            }
            return Some(RestrictionDenial::GeoDenied(rule.value.clone()));
        }
    }
    None
}
