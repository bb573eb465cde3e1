use cardauth::application::approvals::ApprovalQueue;
use cardauth::application::engine::AuthorizationEngine;
use cardauth::application::guard::AuthenticationGuard;
use cardauth::application::limits::LimitTracker;
use cardauth::config::EngineConfig;
use cardauth::domain::card::{Balance, Card, CardStatus, SecuritySettings, UsageRestrictions};
use cardauth::domain::ports::CardStoreRef;
use cardauth::domain::transaction::{PaymentMethod, TransactionGeo, TransactionRequest};
use cardauth::infrastructure::in_memory::{
    InMemoryApprovalStore, InMemoryCardStore, InMemoryCredentialStore,
};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

/// Everything wired together against in-memory stores, with the clock left
/// to the caller.
pub struct Harness {
    pub cards: CardStoreRef,
    pub tracker: Arc<LimitTracker>,
    pub queue: Arc<ApprovalQueue>,
    pub engine: Arc<AuthorizationEngine>,
    pub guard: Arc<AuthenticationGuard>,
    pub credentials: InMemoryCredentialStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let cards: CardStoreRef = Arc::new(InMemoryCardStore::new());
        let approvals = Arc::new(InMemoryApprovalStore::new());
        let credentials = InMemoryCredentialStore::new();

        let tracker = Arc::new(LimitTracker::new(
            config.reservation_hold(),
            Arc::clone(&cards),
        ));
        let queue = Arc::new(ApprovalQueue::new(approvals, Arc::clone(&tracker)));
        let engine = Arc::new(AuthorizationEngine::new(
            Arc::clone(&cards),
            Arc::clone(&tracker),
            Arc::clone(&queue),
            config.clone(),
        ));
        let guard = Arc::new(AuthenticationGuard::new(
            Arc::new(credentials.clone()),
            config.max_failed_attempts,
            config.lockout(),
            config.session_idle(),
        ));

        Self {
            cards,
            tracker,
            queue,
            engine,
            guard,
            credentials,
        }
    }

    pub async fn seed_card(&self, card: Card) {
        self.cards.store(card).await.unwrap();
    }
}

/// An active domestic card with a generous monthly cap and no geographic,
/// merchant or time rules.
pub fn card(id: &str) -> Card {
    Card {
        id: id.to_string(),
        status: CardStatus::Active,
        credit_limit: Balance::new(dec!(10000)),
        available_balance: Balance::new(dec!(10000)),
        billing_country: "US".to_string(),
        billing_utc_offset_minutes: 0,
        security: SecuritySettings {
            requires_pin: false,
            requires_2fa: false,
            allow_online: true,
            allow_international: false,
            approval_threshold: dec!(5000),
            max_daily: dec!(10000),
            max_monthly: dec!(100000),
            allowed_approver_ids: Vec::new(),
        },
        restrictions: UsageRestrictions::allowing(&["pharmacy", "equipment"]),
    }
}

pub fn request(card_id: &str, amount: Decimal, now: DateTime<Utc>) -> TransactionRequest {
    TransactionRequest {
        card_id: card_id.to_string(),
        amount: amount.try_into().unwrap(),
        currency: "USD".to_string(),
        category: "pharmacy".to_string(),
        merchant: "City Pharmacy".to_string(),
        geo: TransactionGeo {
            country: "US".to_string(),
            region: "CA".to_string(),
            city: "Oakland".to_string(),
        },
        timestamp: now,
        payment_method: PaymentMethod::InStore,
    }
}

/// A Wednesday at noon UTC, so weekday and time-window rules behave
/// predictably.
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap()
}
