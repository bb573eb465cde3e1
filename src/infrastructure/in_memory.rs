use crate::domain::approval::{ApprovalRequest, ApprovalStatus};
use crate::domain::card::Card;
use crate::domain::ports::{ApprovalStore, CardStore, CredentialVerifier};
use crate::domain::session::Capability;
use crate::error::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory store for cards.
///
/// Uses `Arc<RwLock<HashMap>>` to allow shared concurrent access. Ideal for
/// testing or deployments where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryCardStore {
    cards: Arc<RwLock<HashMap<String, Card>>>,
}

impl InMemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CardStore for InMemoryCardStore {
    async fn store(&self, card: Card) -> Result<()> {
        let mut cards = self.cards.write().await;
        cards.insert(card.id.clone(), card);
        Ok(())
    }

    async fn get(&self, card_id: &str) -> Result<Option<Card>> {
        let cards = self.cards.read().await;
        Ok(cards.get(card_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Card>> {
        let cards = self.cards.read().await;
        Ok(cards.values().cloned().collect())
    }
}

/// A thread-safe in-memory store for approval requests.
#[derive(Default, Clone)]
pub struct InMemoryApprovalStore {
    approvals: Arc<RwLock<HashMap<Uuid, ApprovalRequest>>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn store(&self, approval: ApprovalRequest) -> Result<()> {
        let mut approvals = self.approvals.write().await;
        approvals.insert(approval.id, approval);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ApprovalRequest>> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(&id).cloned())
    }

    async fn list(&self, status: Option<ApprovalStatus>) -> Result<Vec<ApprovalRequest>> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .values()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
struct UserRecord {
    password_hash: String,
    salt: String,
    second_factor: Option<String>,
    capabilities: HashSet<Capability>,
}

/// In-memory credential backend.
///
/// Stores salted SHA-256 password digests, never plaintext. Second-factor
/// codes are compared verbatim; generating and delivering them is outside
/// the engine.
#[derive(Default, Clone)]
pub struct InMemoryCredentialStore {
    users: Arc<RwLock<HashMap<String, UserRecord>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(
        &self,
        user_id: &str,
        password: &str,
        second_factor: Option<&str>,
        capabilities: HashSet<Capability>,
    ) {
        let salt = Uuid::new_v4().to_string();
        let record = UserRecord {
            password_hash: hash_password(password, &salt),
            salt,
            second_factor: second_factor.map(|c| c.to_string()),
            capabilities,
        };
        let mut users = self.users.write().await;
        users.insert(user_id.to_string(), record);
    }
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl CredentialVerifier for InMemoryCredentialStore {
    async fn verify_password(&self, user_id: &str, password: &str) -> Result<bool> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .is_some_and(|u| u.password_hash == hash_password(password, &u.salt)))
    }

    async fn verify_second_factor(&self, user_id: &str, code: &str) -> Result<bool> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .and_then(|u| u.second_factor.as_deref())
            .is_some_and(|expected| expected == code))
    }

    async fn requires_second_factor(&self, user_id: &str) -> Result<bool> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .is_some_and(|u| u.second_factor.is_some()))
    }

    async fn capabilities(&self, user_id: &str) -> Result<HashSet<Capability>> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .map(|u| u.capabilities.clone())
            .unwrap_or_default())
    }
}
