use crate::domain::transaction::TransactionRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Review priority of an approval request, independent of arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// One level higher, saturating at `Critical`.
    pub fn bumped(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != Self::Pending
    }
}

/// A transaction held for manual review.
///
/// Created by the authorization engine when an amount exceeds the card's
/// approval threshold. Terminal states are immutable; an expired request can
/// never be approved or rejected afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    /// Snapshot of the transaction as submitted.
    pub transaction: TransactionRequest,
    /// The limit-tracker hold backing this request.
    pub reservation_id: Uuid,
    /// Approver allow-list snapshotted from the card at creation time.
    /// Empty means any holder of the approve-transactions capability.
    pub allowed_approver_ids: Vec<String>,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub urgency: Urgency,
    pub status: ApprovalStatus,
    pub resolved_by: Option<String>,
    /// Approval notes or rejection reason.
    pub resolution_notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transaction: TransactionRequest,
        reservation_id: Uuid,
        allowed_approver_ids: Vec<String>,
        requested_by: String,
        urgency: Urgency,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction,
            reservation_id,
            allowed_approver_ids,
            requested_by,
            requested_at: now,
            expires_at: now + ttl,
            urgency,
            status: ApprovalStatus::Pending,
            resolved_by: None,
            resolution_notes: None,
            resolved_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now >= self.expires_at
    }
}

/// Record of an approve/reject decision, separate from the original
/// authorization decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResolution {
    pub approval_id: Uuid,
    pub status: ApprovalStatus,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
}

/// Sorts requests for presentation and processing: urgency descending,
/// then oldest first. Stable, usable identically in tests and live queues.
pub fn review_order(requests: &mut [ApprovalRequest]) {
    requests.sort_by(|a, b| {
        b.urgency
            .cmp(&a.urgency)
            .then(a.requested_at.cmp(&b.requested_at))
    });
}
