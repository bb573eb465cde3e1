use super::approval::{ApprovalRequest, ApprovalStatus};
use super::card::Card;
use super::session::Capability;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait CardStore: Send + Sync {
    async fn store(&self, card: Card) -> Result<()>;
    async fn get(&self, card_id: &str) -> Result<Option<Card>>;
    async fn get_all(&self) -> Result<Vec<Card>>;
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn store(&self, approval: ApprovalRequest) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<ApprovalRequest>>;
    /// Requests with the given status, or all of them when `None`.
    async fn list(&self, status: Option<ApprovalStatus>) -> Result<Vec<ApprovalRequest>>;
}

/// Credential backend for the authentication guard.
///
/// The guard owns the session state machine; implementations only answer
/// whether a credential is valid and what the user is entitled to.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify_password(&self, user_id: &str, password: &str) -> Result<bool>;
    async fn verify_second_factor(&self, user_id: &str, code: &str) -> Result<bool>;
    async fn requires_second_factor(&self, user_id: &str) -> Result<bool>;
    async fn capabilities(&self, user_id: &str) -> Result<HashSet<Capability>>;
}

pub type CardStoreRef = Arc<dyn CardStore>;
pub type ApprovalStoreRef = Arc<dyn ApprovalStore>;
pub type CredentialVerifierRef = Arc<dyn CredentialVerifier>;
