//! The authorization decision pipeline.
//!
//! Orchestrates card status, restriction evaluation and the limit tracker to
//! produce one decision per request. The only side effect before the
//! decision is the limit-tracker reservation, so outcomes are deterministic
//! given a fixed `now`.

use crate::application::approvals::ApprovalQueue;
use crate::application::limits::LimitTracker;
use crate::application::restrictions::{self, Evaluation};
use crate::config::EngineConfig;
use crate::domain::approval::{ApprovalRequest, Urgency};
use crate::domain::card::Card;
use crate::domain::ports::CardStoreRef;
use crate::domain::transaction::{
    AuthorizationDecision, DeclineReason, PaymentMethod, TransactionRequest,
};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub struct AuthorizationEngine {
    cards: CardStoreRef,
    tracker: Arc<LimitTracker>,
    queue: Arc<ApprovalQueue>,
    config: EngineConfig,
}

impl AuthorizationEngine {
    pub fn new(
        cards: CardStoreRef,
        tracker: Arc<LimitTracker>,
        queue: Arc<ApprovalQueue>,
        config: EngineConfig,
    ) -> Self {
        Self {
            cards,
            tracker,
            queue,
            config,
        }
    }

    /// Decides a transaction request: approved, declined, or routed to the
    /// approval queue. The decision is final once returned; only a pending
    /// approval can later be resolved, and that produces a separate record.
    pub async fn authorize(
        &self,
        request: TransactionRequest,
        requested_by: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationDecision> {
        validate(&request)?;

        let card = self
            .cards
            .get(&request.card_id)
            .await?
            .ok_or_else(|| EngineError::CardNotFound(request.card_id.clone()))?;

        if card.status != crate::domain::card::CardStatus::Active {
            return Ok(declined(&request, DeclineReason::CardNotActive));
        }

        if let Some(reason) = self.check_security_gates(&card, &request) {
            return Ok(declined(&request, DeclineReason::Restriction(reason)));
        }

        let local_now = now.with_timezone(&card.billing_offset());
        if let Evaluation::Denied(denial) =
            restrictions::evaluate(&card.restrictions, &request, local_now)
        {
            return Ok(declined(
                &request,
                DeclineReason::Restriction(denial.to_string()),
            ));
        }

        let reservation = match self.tracker.try_reserve(&card, request.amount, now).await {
            Ok(reservation) => reservation,
            Err(EngineError::InsufficientFunds) => {
                return Ok(declined(&request, DeclineReason::InsufficientFunds));
            }
            Err(EngineError::DailyLimitExceeded) => {
                return Ok(declined(&request, DeclineReason::DailyLimitExceeded));
            }
            Err(EngineError::MonthlyLimitExceeded) => {
                return Ok(declined(&request, DeclineReason::MonthlyLimitExceeded));
            }
            Err(other) => return Err(other),
        };

        if request.amount.value() > card.security.approval_threshold {
            let urgency = derive_urgency(
                request.amount.value(),
                card.security.approval_threshold,
                &request.category,
                &self.config.high_risk_categories,
            );
            // The hold must outlive the default auto-release window so the
            // funds stay unavailable until the approval resolves or expires.
            let expires_at = now + self.config.approval_ttl();
            self.tracker.extend_hold(&reservation, expires_at).await?;

            let approval = ApprovalRequest::new(
                request.clone(),
                reservation.id,
                card.security.allowed_approver_ids.clone(),
                requested_by.to_string(),
                urgency,
                now,
                self.config.approval_ttl(),
            );
            let approval_id = approval.id;
            self.queue.submit(approval).await?;

            tracing::info!(
                card_id = %request.card_id,
                %approval_id,
                ?urgency,
                amount = %request.amount.value(),
                "transaction routed for manual approval"
            );
            return Ok(AuthorizationDecision::PendingApproval { approval_id });
        }

        self.tracker.commit(&reservation, now).await?;

        tracing::info!(
            card_id = %request.card_id,
            amount = %request.amount.value(),
            "transaction approved"
        );
        Ok(AuthorizationDecision::Approved)
    }

    /// Security-settings gates that sit in front of the usage restrictions.
    fn check_security_gates(&self, card: &Card, request: &TransactionRequest) -> Option<String> {
        if request.payment_method == PaymentMethod::Online && !card.security.allow_online {
            return Some("online payments are disabled for this card".to_string());
        }
        if !card.security.allow_international
            && !request
                .geo
                .country
                .eq_ignore_ascii_case(&card.billing_country)
        {
            return Some("international transactions are disabled for this card".to_string());
        }
        None
    }
}

fn declined(request: &TransactionRequest, reason: DeclineReason) -> AuthorizationDecision {
    tracing::info!(card_id = %request.card_id, %reason, "transaction declined");
    AuthorizationDecision::Declined { reason }
}

fn validate(request: &TransactionRequest) -> Result<()> {
    if request.currency.trim().is_empty() {
        return Err(EngineError::Validation("currency is required".to_string()));
    }
    if request.merchant.trim().is_empty() {
        return Err(EngineError::Validation("merchant is required".to_string()));
    }
    if request.category.trim().is_empty() {
        return Err(EngineError::Validation("category is required".to_string()));
    }
    Ok(())
}

/// Urgency from the amount-to-threshold ratio, bumped one level for
/// configured high-risk categories.
fn derive_urgency(
    amount: Decimal,
    threshold: Decimal,
    category: &str,
    high_risk: &[String],
) -> Urgency {
    let base = if threshold <= Decimal::ZERO {
        Urgency::High
    } else {
        let ratio = amount / threshold;
        if ratio >= dec!(5) {
            Urgency::Critical
        } else if ratio >= dec!(3) {
            Urgency::High
        } else if ratio >= dec!(1.5) {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    };
    if high_risk.iter().any(|c| c.eq_ignore_ascii_case(category)) {
        base.bumped()
    } else {
        base
    }
}
