use crate::domain::approval::{ApprovalRequest, ApprovalStatus};
use crate::domain::card::Card;
use crate::domain::ports::{ApprovalStore, CardStore};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Column Family for card records.
pub const CF_CARDS: &str = "cards";
/// Column Family for approval requests.
pub const CF_APPROVALS: &str = "approvals";

/// A persistent store implementation using RocksDB.
///
/// Handles storage for both `Card` and `ApprovalRequest` entities using
/// separate Column Families. This struct is thread-safe (`Clone` shares the
/// underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_cards = ColumnFamilyDescriptor::new(CF_CARDS, Options::default());
        let cf_approvals = ColumnFamilyDescriptor::new(CF_APPROVALS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_cards, cf_approvals])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            EngineError::internal(std::io::Error::other(format!(
                "column family not found: {name}"
            )))
        })
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(EngineError::internal)
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(EngineError::internal)
    }
}

#[async_trait]
impl CardStore for RocksDbStore {
    async fn store(&self, card: Card) -> Result<()> {
        let cf = self.cf(CF_CARDS)?;
        let value = Self::encode(&card)?;
        self.db.put_cf(cf, card.id.as_bytes(), value)?;
        Ok(())
    }

    async fn get(&self, card_id: &str) -> Result<Option<Card>> {
        let cf = self.cf(CF_CARDS)?;
        match self.db.get_cf(cf, card_id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<Card>> {
        let cf = self.cf(CF_CARDS)?;
        let mut cards = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            cards.push(Self::decode(&value)?);
        }
        Ok(cards)
    }
}

#[async_trait]
impl ApprovalStore for RocksDbStore {
    async fn store(&self, approval: ApprovalRequest) -> Result<()> {
        let cf = self.cf(CF_APPROVALS)?;
        let value = Self::encode(&approval)?;
        self.db.put_cf(cf, approval.id.as_bytes(), value)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ApprovalRequest>> {
        let cf = self.cf(CF_APPROVALS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, status: Option<ApprovalStatus>) -> Result<Vec<ApprovalRequest>> {
        let cf = self.cf(CF_APPROVALS)?;
        let mut approvals = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            let approval: ApprovalRequest = Self::decode(&value)?;
            if status.is_none_or(|s| approval.status == s) {
                approvals.push(approval);
            }
        }
        Ok(approvals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::approval::Urgency;
    use crate::domain::card::{
        Amount, Balance, CardStatus, SecuritySettings, UsageRestrictions,
    };
    use crate::domain::transaction::{PaymentMethod, TransactionGeo, TransactionRequest};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn test_card(id: &str) -> Card {
        Card {
            id: id.to_string(),
            status: CardStatus::Active,
            credit_limit: Balance::new(dec!(1000)),
            available_balance: Balance::new(dec!(800)),
            billing_country: "US".to_string(),
            billing_utc_offset_minutes: -480,
            security: SecuritySettings {
                requires_pin: true,
                requires_2fa: false,
                allow_online: true,
                allow_international: false,
                approval_threshold: dec!(500),
                max_daily: dec!(1000),
                max_monthly: dec!(10000),
                allowed_approver_ids: vec!["alice".to_string()],
            },
            restrictions: UsageRestrictions::allowing(&["pharmacy", "equipment"]),
        }
    }

    fn test_approval() -> ApprovalRequest {
        let now = Utc::now();
        let tx = TransactionRequest {
            card_id: "card-1".to_string(),
            amount: Amount::new(dec!(900)).unwrap(),
            currency: "USD".to_string(),
            category: "equipment".to_string(),
            merchant: "MedSupply".to_string(),
            geo: TransactionGeo {
                country: "US".to_string(),
                region: "CA".to_string(),
                city: "Oakland".to_string(),
            },
            timestamp: now,
            payment_method: PaymentMethod::Online,
        };
        ApprovalRequest::new(
            tx,
            Uuid::new_v4(),
            vec!["alice".to_string()],
            "bob".to_string(),
            Urgency::High,
            now,
            chrono::Duration::hours(24),
        )
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_CARDS).is_some());
        assert!(store.db.cf_handle(CF_APPROVALS).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_card_store() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        let card = test_card("card-1");

        CardStore::store(&store, card.clone()).await.unwrap();

        let retrieved = CardStore::get(&store, "card-1").await.unwrap().unwrap();
        assert_eq!(retrieved, card);

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);

        assert!(CardStore::get(&store, "card-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rocksdb_approval_store() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        let approval = test_approval();

        ApprovalStore::store(&store, approval.clone()).await.unwrap();

        let retrieved = ApprovalStore::get(&store, approval.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retrieved, approval);

        let pending = store.list(Some(ApprovalStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        let rejected = store.list(Some(ApprovalStatus::Rejected)).await.unwrap();
        assert!(rejected.is_empty());
    }
}
