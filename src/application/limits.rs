//! Per-card spend tracking with provisional holds.
//!
//! Every card gets its own ledger behind its own async mutex, so mutations
//! for one card are fully serialized while unrelated cards proceed in
//! parallel. Reservations are granted in lock-acquisition order; a check can
//! never interleave with another card-local write.

use crate::domain::card::{Amount, Balance, Card, CardId};
use crate::domain::ports::CardStoreRef;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A provisional hold against a card's balance and limits, not yet final.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: Uuid,
    pub card_id: CardId,
    pub amount: Amount,
}

#[derive(Debug)]
struct Hold {
    amount: Decimal,
    expires_at: DateTime<Utc>,
}

/// Running totals and outstanding holds for one card.
#[derive(Debug)]
struct CardLedger {
    credit_limit: Decimal,
    available: Decimal,
    max_daily: Decimal,
    max_monthly: Decimal,
    offset: FixedOffset,
    day: NaiveDate,
    daily_total: Decimal,
    month: (i32, u32),
    monthly_total: Decimal,
    holds: HashMap<Uuid, Hold>,
}

impl CardLedger {
    fn from_card(card: &Card, now: DateTime<Utc>) -> Self {
        let offset = card.billing_offset();
        let local = now.with_timezone(&offset).date_naive();
        Self {
            credit_limit: card.credit_limit.value(),
            available: card.available_balance.value(),
            max_daily: card.security.max_daily,
            max_monthly: card.security.max_monthly,
            offset,
            day: local,
            daily_total: Decimal::ZERO,
            month: (local.year(), local.month()),
            monthly_total: Decimal::ZERO,
            holds: HashMap::new(),
        }
    }

    /// Resets totals when the card's local day or month has rolled over.
    fn roll_windows(&mut self, now: DateTime<Utc>) {
        let local = now.with_timezone(&self.offset).date_naive();
        if local != self.day {
            self.day = local;
            self.daily_total = Decimal::ZERO;
        }
        let month = (local.year(), local.month());
        if month != self.month {
            self.month = month;
            self.monthly_total = Decimal::ZERO;
        }
    }

    /// Releases holds past their window. Returns how many were reclaimed.
    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Uuid> = self
            .holds
            .iter()
            .filter(|(_, hold)| now >= hold.expires_at)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(hold) = self.holds.remove(id) {
                self.available += hold.amount;
            }
        }
        expired.len()
    }

    fn held_total(&self) -> Decimal {
        self.holds.values().map(|h| h.amount).sum()
    }
}

/// Tracks spend against per-card balances and daily/monthly limits.
///
/// The central invariant: the sum of committed amounts never exceeds the
/// card's credit limit, daily cap, or monthly cap, even under concurrent
/// requests. Outstanding holds count against the caps so that two pending
/// reservations cannot both commit past a limit.
pub struct LimitTracker {
    ledgers: DashMap<CardId, Arc<Mutex<CardLedger>>>,
    cards: CardStoreRef,
    hold_window: chrono::Duration,
}

impl LimitTracker {
    pub fn new(hold_window: chrono::Duration, cards: CardStoreRef) -> Self {
        Self {
            ledgers: DashMap::new(),
            cards,
            hold_window,
        }
    }

    fn ledger(&self, card: &Card, now: DateTime<Utc>) -> Arc<Mutex<CardLedger>> {
        self.ledgers
            .entry(card.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CardLedger::from_card(card, now))))
            .clone()
    }

    /// Atomically checks balance and both limit windows, then holds the
    /// amount. The hold auto-releases after the configured window unless
    /// committed or extended.
    pub async fn try_reserve(
        &self,
        card: &Card,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let ledger = self.ledger(card, now);
        let mut ledger = ledger.lock().await;
        ledger.roll_windows(now);
        ledger.purge_expired(now);

        let value = amount.value();
        if ledger.available < value {
            return Err(EngineError::InsufficientFunds);
        }
        let held = ledger.held_total();
        if ledger.daily_total + held + value > ledger.max_daily {
            return Err(EngineError::DailyLimitExceeded);
        }
        if ledger.monthly_total + held + value > ledger.max_monthly {
            return Err(EngineError::MonthlyLimitExceeded);
        }

        let id = Uuid::new_v4();
        ledger.available -= value;
        ledger.holds.insert(
            id,
            Hold {
                amount: value,
                expires_at: now + self.hold_window,
            },
        );
        tracing::debug!(card_id = %card.id, reservation_id = %id, %value, "reserved");
        Ok(Reservation {
            id,
            card_id: card.id.clone(),
            amount,
        })
    }

    /// Finalizes a hold into the permanent spend totals and persists the
    /// card's new available balance. Returns that balance. Fails if the
    /// hold already auto-released.
    pub async fn commit(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<Balance> {
        let ledger = self
            .ledgers
            .get(&reservation.card_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::ReservationExpired)?;
        let mut ledger = ledger.lock().await;
        ledger.roll_windows(now);
        ledger.purge_expired(now);

        let hold = ledger
            .holds
            .remove(&reservation.id)
            .ok_or(EngineError::ReservationExpired)?;
        ledger.daily_total += hold.amount;
        ledger.monthly_total += hold.amount;

        // Snapshot while still holding the ledger lock, so concurrent
        // commits cannot persist an earlier, higher balance last.
        let balance = Balance::new(ledger.available);
        if let Some(mut card) = self.cards.get(&reservation.card_id).await? {
            card.available_balance = balance;
            self.cards.store(card).await?;
        }

        tracing::debug!(
            card_id = %reservation.card_id,
            reservation_id = %reservation.id,
            available = %ledger.available,
            "committed"
        );
        Ok(balance)
    }

    /// Undoes a hold without touching the totals. Releasing a hold that has
    /// already auto-released is a no-op.
    pub async fn release(&self, reservation: &Reservation) -> Result<()> {
        let Some(ledger) = self
            .ledgers
            .get(&reservation.card_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Ok(());
        };
        let mut ledger = ledger.lock().await;
        if let Some(hold) = ledger.holds.remove(&reservation.id) {
            ledger.available += hold.amount;
            tracing::debug!(
                card_id = %reservation.card_id,
                reservation_id = %reservation.id,
                "released"
            );
        }
        Ok(())
    }

    /// Pushes a hold's auto-release deadline out to `until`. Used when the
    /// hold backs a pending approval and must survive until resolution.
    pub async fn extend_hold(&self, reservation: &Reservation, until: DateTime<Utc>) -> Result<()> {
        let ledger = self
            .ledgers
            .get(&reservation.card_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::ReservationExpired)?;
        let mut ledger = ledger.lock().await;
        let hold = ledger
            .holds
            .get_mut(&reservation.id)
            .ok_or(EngineError::ReservationExpired)?;
        if until > hold.expires_at {
            hold.expires_at = until;
        }
        Ok(())
    }

    /// Current available balance, if the card has been touched.
    pub async fn available(&self, card_id: &str) -> Option<Balance> {
        let ledger = self.ledgers.get(card_id).map(|entry| Arc::clone(entry.value()))?;
        let ledger = ledger.lock().await;
        Some(Balance::new(ledger.available))
    }

    /// Releases every expired hold across all cards. Idempotent; safe to run
    /// redundantly from timers.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let ledgers: Vec<Arc<Mutex<CardLedger>>> =
            self.ledgers.iter().map(|entry| entry.value().clone()).collect();
        let mut released = 0;
        for ledger in ledgers {
            let mut ledger = ledger.lock().await;
            released += ledger.purge_expired(now);
        }
        if released > 0 {
            tracing::warn!(released, "auto-released expired reservations");
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::card::{CardStatus, SecuritySettings, UsageRestrictions};
    use crate::domain::ports::CardStore;
    use crate::infrastructure::in_memory::InMemoryCardStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn card(available: Decimal, max_daily: Decimal, max_monthly: Decimal) -> Card {
        Card {
            id: "card-1".to_string(),
            status: CardStatus::Active,
            credit_limit: Balance::new(dec!(10000)),
            available_balance: Balance::new(available),
            billing_country: "US".to_string(),
            billing_utc_offset_minutes: 0,
            security: SecuritySettings {
                requires_pin: false,
                requires_2fa: false,
                allow_online: true,
                allow_international: true,
                approval_threshold: dec!(5000),
                max_daily,
                max_monthly,
                allowed_approver_ids: Vec::new(),
            },
            restrictions: UsageRestrictions::allowing(&["pharmacy"]),
        }
    }

    fn tracker() -> LimitTracker {
        LimitTracker::new(
            chrono::Duration::minutes(2),
            Arc::new(InMemoryCardStore::new()),
        )
    }

    #[tokio::test]
    async fn test_reserve_and_commit_updates_balance() {
        let tracker = tracker();
        let card = card(dec!(100), dec!(1000), dec!(10000));
        let now = Utc::now();

        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(40)).unwrap(), now)
            .await
            .unwrap();
        // Held, not yet committed: balance already unavailable.
        assert_eq!(tracker.available("card-1").await, Some(Balance::new(dec!(60))));

        let balance = tracker.commit(&reservation, now).await.unwrap();
        assert_eq!(balance, Balance::new(dec!(60)));
    }

    #[tokio::test]
    async fn test_release_restores_balance_without_totals() {
        let tracker = tracker();
        let card = card(dec!(100), dec!(100), dec!(100));
        let now = Utc::now();

        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(100)).unwrap(), now)
            .await
            .unwrap();
        tracker.release(&reservation).await.unwrap();
        assert_eq!(tracker.available("card-1").await, Some(Balance::new(dec!(100))));

        // Released holds do not count toward the daily cap.
        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(100)).unwrap(), now)
            .await
            .unwrap();
        tracker.commit(&reservation, now).await.unwrap();
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let tracker = tracker();
        let card = card(dec!(50), dec!(1000), dec!(10000));
        let result = tracker
            .try_reserve(&card, Amount::new(dec!(80)).unwrap(), Utc::now())
            .await;
        assert!(matches!(result, Err(EngineError::InsufficientFunds)));
    }

    #[tokio::test]
    async fn test_outstanding_holds_count_toward_daily_cap() {
        let tracker = tracker();
        let card = card(dec!(1000), dec!(100), dec!(10000));
        let now = Utc::now();

        let _held = tracker
            .try_reserve(&card, Amount::new(dec!(70)).unwrap(), now)
            .await
            .unwrap();
        let result = tracker
            .try_reserve(&card, Amount::new(dec!(40)).unwrap(), now)
            .await;
        assert!(matches!(result, Err(EngineError::DailyLimitExceeded)));
    }

    #[tokio::test]
    async fn test_monthly_cap() {
        let tracker = tracker();
        let card = card(dec!(1000), dec!(1000), dec!(100));
        let now = Utc::now();

        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(80)).unwrap(), now)
            .await
            .unwrap();
        tracker.commit(&reservation, now).await.unwrap();

        let result = tracker
            .try_reserve(&card, Amount::new(dec!(30)).unwrap(), now)
            .await;
        assert!(matches!(result, Err(EngineError::MonthlyLimitExceeded)));
    }

    #[tokio::test]
    async fn test_daily_total_resets_at_local_midnight() {
        let tracker = tracker();
        let card = card(dec!(1000), dec!(100), dec!(10000));
        let now = Utc::now();

        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(100)).unwrap(), now)
            .await
            .unwrap();
        tracker.commit(&reservation, now).await.unwrap();
        assert!(matches!(
            tracker
                .try_reserve(&card, Amount::new(dec!(10)).unwrap(), now)
                .await,
            Err(EngineError::DailyLimitExceeded)
        ));

        // Next day the daily window is fresh; the monthly one persists.
        let tomorrow = now + chrono::Duration::days(1);
        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(10)).unwrap(), tomorrow)
            .await
            .unwrap();
        tracker.commit(&reservation, tomorrow).await.unwrap();
    }

    #[tokio::test]
    async fn test_monthly_total_resets_at_local_month_boundary() {
        let tracker = tracker();
        let card = card(dec!(1000), dec!(100), dec!(100));
        let jan30 = Utc.with_ymd_and_hms(2024, 1, 30, 12, 0, 0).unwrap();

        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(100)).unwrap(), jan30)
            .await
            .unwrap();
        tracker.commit(&reservation, jan30).await.unwrap();

        // Next day the daily window is fresh but the month still carries
        // the spend.
        let jan31 = jan30 + chrono::Duration::days(1);
        assert!(matches!(
            tracker
                .try_reserve(&card, Amount::new(dec!(10)).unwrap(), jan31)
                .await,
            Err(EngineError::MonthlyLimitExceeded)
        ));

        // Across the month boundary both windows are fresh.
        let feb1 = jan30 + chrono::Duration::days(2);
        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(100)).unwrap(), feb1)
            .await
            .unwrap();
        tracker.commit(&reservation, feb1).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_persists_the_card_balance_snapshot() {
        let cards = Arc::new(InMemoryCardStore::new());
        let tracker = LimitTracker::new(chrono::Duration::minutes(2), cards.clone());
        let card = card(dec!(100), dec!(1000), dec!(10000));
        cards.store(card.clone()).await.unwrap();
        let now = Utc::now();

        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(40)).unwrap(), now)
            .await
            .unwrap();
        tracker.commit(&reservation, now).await.unwrap();

        let stored = cards.get("card-1").await.unwrap().unwrap();
        assert_eq!(stored.available_balance, Balance::new(dec!(60)));
    }

    #[tokio::test]
    async fn test_hold_auto_releases_after_window() {
        let tracker = tracker();
        let card = card(dec!(100), dec!(1000), dec!(10000));
        let now = Utc::now();

        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(100)).unwrap(), now)
            .await
            .unwrap();

        let later = now + chrono::Duration::minutes(3);
        assert_eq!(tracker.sweep_expired(later).await, 1);
        assert_eq!(tracker.available("card-1").await, Some(Balance::new(dec!(100))));

        // Committing a lapsed hold must fail.
        let result = tracker.commit(&reservation, later).await;
        assert!(matches!(result, Err(EngineError::ReservationExpired)));
    }

    #[tokio::test]
    async fn test_extend_hold_survives_sweep() {
        let tracker = tracker();
        let card = card(dec!(100), dec!(1000), dec!(10000));
        let now = Utc::now();

        let reservation = tracker
            .try_reserve(&card, Amount::new(dec!(100)).unwrap(), now)
            .await
            .unwrap();
        tracker
            .extend_hold(&reservation, now + chrono::Duration::hours(24))
            .await
            .unwrap();

        let later = now + chrono::Duration::minutes(10);
        assert_eq!(tracker.sweep_expired(later).await, 0);
        tracker.commit(&reservation, later).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_reservations_cannot_double_spend() {
        let tracker = Arc::new(tracker());
        let card = card(dec!(100), dec!(1000), dec!(10000));
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let tracker = tracker.clone();
            let card = card.clone();
            handles.push(tokio::spawn(async move {
                tracker
                    .try_reserve(&card, Amount::new(dec!(80)).unwrap(), now)
                    .await
            }));
        }

        let mut successes = 0;
        let mut failures = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(EngineError::InsufficientFunds) => failures += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(failures, 1);
    }
}
