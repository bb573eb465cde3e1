//! The manual-approval queue.
//!
//! Each request moves `pending -> {approved, rejected, expired}` exactly
//! once; terminal states are immutable. Approving commits the backing
//! limit-tracker hold, rejecting or expiring releases it. Resolution and
//! expiry are serialized per request, so racing resolvers settle in lock
//! order and the losers observe the terminal state.

use crate::application::limits::{LimitTracker, Reservation};
use crate::domain::approval::{self, ApprovalRequest, ApprovalResolution, ApprovalStatus};
use crate::domain::ports::ApprovalStoreRef;
use crate::domain::session::{Approver, Capability};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct ApprovalQueue {
    store: ApprovalStoreRef,
    tracker: Arc<LimitTracker>,
    resolution_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ApprovalQueue {
    pub fn new(store: ApprovalStoreRef, tracker: Arc<LimitTracker>) -> Self {
        Self {
            store,
            tracker,
            resolution_locks: DashMap::new(),
        }
    }

    /// Enqueues a freshly created request. Called by the authorization
    /// engine only.
    pub async fn submit(&self, approval: ApprovalRequest) -> Result<()> {
        self.store.store(approval).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ApprovalRequest>> {
        self.store.get(id).await
    }

    /// Approves a pending request: commits the held reservation, then
    /// records the resolution. If the commit fails the resolution is not
    /// recorded.
    pub async fn approve(
        &self,
        id: Uuid,
        approver: &Approver,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalResolution> {
        let lock = self.resolution_lock(id);
        let _resolving = lock.lock().await;

        let mut approval = self.fetch_pending(id, now).await?;
        authorize_approver(&approval, approver)?;

        self.tracker
            .commit(&backing_reservation(&approval), now)
            .await?;

        approval.status = ApprovalStatus::Approved;
        approval.resolved_by = Some(approver.id.clone());
        approval.resolution_notes = notes;
        approval.resolved_at = Some(now);
        self.store.store(approval.clone()).await?;

        tracing::info!(approval_id = %id, approver = %approver.id, "approval granted");
        Ok(resolution(&approval, now))
    }

    /// Rejects a pending request and releases its reservation. A non-empty
    /// reason is required.
    pub async fn reject(
        &self,
        id: Uuid,
        approver: &Approver,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalResolution> {
        if reason.trim().is_empty() {
            return Err(EngineError::Validation(
                "rejection reason is required".to_string(),
            ));
        }

        let lock = self.resolution_lock(id);
        let _resolving = lock.lock().await;

        let mut approval = self.fetch_pending(id, now).await?;
        authorize_approver(&approval, approver)?;

        self.tracker.release(&backing_reservation(&approval)).await?;

        approval.status = ApprovalStatus::Rejected;
        approval.resolved_by = Some(approver.id.clone());
        approval.resolution_notes = Some(reason.to_string());
        approval.resolved_at = Some(now);
        self.store.store(approval.clone()).await?;

        tracing::info!(approval_id = %id, approver = %approver.id, reason, "approval rejected");
        Ok(resolution(&approval, now))
    }

    /// Pending requests in review order: urgency descending, oldest first.
    /// Requests past their deadline are expired on the way out.
    pub async fn list_pending(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>> {
        let mut pending = Vec::new();
        for approval in self.store.list(Some(ApprovalStatus::Pending)).await? {
            if approval.is_expired(now) {
                self.expire_locked(approval.id, now).await?;
            } else {
                pending.push(approval);
            }
        }
        approval::review_order(&mut pending);
        Ok(pending)
    }

    /// Expires every overdue pending request and releases its hold.
    /// Idempotent; safe to run redundantly from timers.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for approval in self.store.list(Some(ApprovalStatus::Pending)).await? {
            if approval.is_expired(now) && self.expire_locked(approval.id, now).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::warn!(expired, "expired overdue approval requests");
        }
        Ok(expired)
    }

    /// Per-request lock serializing resolution and expiry, in the same
    /// spirit as the per-card ledgers in the limit tracker. Entries live as
    /// long as the store's records.
    fn resolution_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.resolution_locks.entry(id).or_default().clone()
    }

    /// Expires one request under its resolution lock, re-reading first
    /// because a racing resolver may have settled it. Returns whether the
    /// request actually expired.
    async fn expire_locked(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let lock = self.resolution_lock(id);
        let _resolving = lock.lock().await;

        let Some(approval) = self.store.get(id).await? else {
            return Ok(false);
        };
        if !approval.is_expired(now) {
            return Ok(false);
        }
        self.expire(approval, now).await?;
        Ok(true)
    }

    /// Loads a request, lazily expiring it first. Errors for unknown,
    /// expired, or already-resolved requests. The caller must hold the
    /// request's resolution lock.
    async fn fetch_pending(&self, id: Uuid, now: DateTime<Utc>) -> Result<ApprovalRequest> {
        let approval = self
            .store
            .get(id)
            .await?
            .ok_or(EngineError::ApprovalNotFound(id))?;

        if approval.is_expired(now) {
            self.expire(approval, now).await?;
            return Err(EngineError::ApprovalExpired);
        }
        if approval.status.is_terminal() {
            return Err(EngineError::ApprovalAlreadyResolved(
                approval.status.as_str().to_string(),
            ));
        }
        Ok(approval)
    }

    async fn expire(&self, mut approval: ApprovalRequest, now: DateTime<Utc>) -> Result<()> {
        self.tracker.release(&backing_reservation(&approval)).await?;
        approval.status = ApprovalStatus::Expired;
        approval.resolved_at = Some(now);
        tracing::info!(approval_id = %approval.id, "approval request expired");
        self.store.store(approval).await
    }
}

/// The approver must be on the card's snapshotted allow-list, or hold the
/// approve-transactions capability when that list is empty.
fn authorize_approver(approval: &ApprovalRequest, approver: &Approver) -> Result<()> {
    let allowed = if approval.allowed_approver_ids.is_empty() {
        approver.capabilities.contains(&Capability::ApproveTransactions)
    } else {
        approval
            .allowed_approver_ids
            .iter()
            .any(|id| id == &approver.id)
    };
    if allowed {
        Ok(())
    } else {
        Err(EngineError::UnauthorizedApprover(approver.id.clone()))
    }
}

fn backing_reservation(approval: &ApprovalRequest) -> Reservation {
    Reservation {
        id: approval.reservation_id,
        card_id: approval.transaction.card_id.clone(),
        amount: approval.transaction.amount,
    }
}

fn resolution(approval: &ApprovalRequest, now: DateTime<Utc>) -> ApprovalResolution {
    ApprovalResolution {
        approval_id: approval.id,
        status: approval.status,
        resolved_by: approval.resolved_by.clone().unwrap_or_default(),
        resolved_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::approval::Urgency;
    use crate::domain::card::Amount;
    use crate::domain::transaction::{PaymentMethod, TransactionGeo, TransactionRequest};
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    fn approver(id: &str, caps: &[Capability]) -> Approver {
        Approver {
            id: id.to_string(),
            capabilities: caps.iter().copied().collect::<HashSet<_>>(),
        }
    }

    fn approval_with_approvers(allowed: &[&str]) -> ApprovalRequest {
        let now = Utc::now();
        let tx = TransactionRequest {
            card_id: "card-1".to_string(),
            amount: Amount::new(dec!(15000)).unwrap(),
            currency: "USD".to_string(),
            category: "equipment".to_string(),
            merchant: "MedSupply".to_string(),
            geo: TransactionGeo {
                country: "US".to_string(),
                region: "CA".to_string(),
                city: "Oakland".to_string(),
            },
            timestamp: now,
            payment_method: PaymentMethod::InStore,
        };
        ApprovalRequest::new(
            tx,
            Uuid::new_v4(),
            allowed.iter().map(|s| s.to_string()).collect(),
            "requester".to_string(),
            Urgency::Medium,
            now,
            chrono::Duration::hours(24),
        )
    }

    #[test]
    fn test_allow_list_member_is_authorized() {
        let approval = approval_with_approvers(&["alice", "bob"]);
        assert!(authorize_approver(&approval, &approver("alice", &[])).is_ok());
    }

    #[test]
    fn test_non_member_is_rejected_even_with_capability() {
        let approval = approval_with_approvers(&["alice"]);
        let result = authorize_approver(
            &approval,
            &approver("mallory", &[Capability::ApproveTransactions]),
        );
        assert!(matches!(result, Err(EngineError::UnauthorizedApprover(_))));
    }

    #[test]
    fn test_empty_allow_list_falls_back_to_capability() {
        let approval = approval_with_approvers(&[]);
        assert!(
            authorize_approver(&approval, &approver("carol", &[Capability::ApproveTransactions]))
                .is_ok()
        );
        let result = authorize_approver(&approval, &approver("carol", &[]));
        assert!(matches!(result, Err(EngineError::UnauthorizedApprover(_))));
    }
}
