// Persistence seam used by lifecycle capture and by actions that write records.
//
// The engine opens one transaction per trigger attempt and commits it only when
// every action of that attempt succeeded.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;

use super::entity::{entity_key, EntitySnapshot};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record {entity_type}/{id} not found")]
    NotFound { entity_type: String, id: String },
    #[error("Record of type '{0}' has no id")]
    MissingId(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Transaction already closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn fetch(&self, entity_type: &str, id: &str) -> StoreResult<Option<EntitySnapshot>>;

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// Unit of work spanning one trigger attempt
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Reads see this transaction's own uncommitted writes.
    async fn fetch(&self, entity_type: &str, id: &str) -> StoreResult<Option<EntitySnapshot>>;

    async fn save(&self, record: EntitySnapshot) -> StoreResult<()>;

    async fn delete(&self, entity_type: &str, id: &str) -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

type RecordKey = (String, String);

fn record_key(entity_type: &str, id: &str) -> RecordKey {
    (entity_key(entity_type), id.to_string())
}

/// In-process store keyed by (entity type, id)
#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<HashMap<RecordKey, EntitySnapshot>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a record directly, outside any unit of work
    pub async fn insert(&self, record: EntitySnapshot) -> StoreResult<()> {
        let id = record
            .id
            .clone()
            .ok_or_else(|| StoreError::MissingId(record.entity_type.clone()))?;
        let key = record_key(&record.entity_type, &id);
        self.records.write().await.insert(key, record);
        Ok(())
    }

    pub async fn remove(&self, entity_type: &str, id: &str) -> Option<EntitySnapshot> {
        self.records.write().await.remove(&record_key(entity_type, id))
    }

    pub async fn get(&self, entity_type: &str, id: &str) -> Option<EntitySnapshot> {
        self.records.read().await.get(&record_key(entity_type, id)).cloned()
    }

    pub async fn records_of(&self, entity_type: &str) -> Vec<EntitySnapshot> {
        let wanted = entity_key(entity_type);
        let mut records: Vec<EntitySnapshot> = self
            .records
            .read()
            .await
            .iter()
            .filter(|((kind, _), _)| *kind == wanted)
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn fetch(&self, entity_type: &str, id: &str) -> StoreResult<Option<EntitySnapshot>> {
        Ok(self.get(entity_type, id).await)
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            records: self.records.clone(),
            staged: Mutex::new(HashMap::new()),
        }))
    }
}

/// Staged writes: `Some` is an upsert, `None` a delete
struct InMemoryTransaction {
    records: Arc<RwLock<HashMap<RecordKey, EntitySnapshot>>>,
    staged: Mutex<HashMap<RecordKey, Option<EntitySnapshot>>>,
}

impl InMemoryTransaction {
    fn staged(&self) -> std::sync::MutexGuard<'_, HashMap<RecordKey, Option<EntitySnapshot>>> {
        self.staged.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn fetch(&self, entity_type: &str, id: &str) -> StoreResult<Option<EntitySnapshot>> {
        let key = record_key(entity_type, id);
        let staged = self.staged().get(&key).cloned();
        if let Some(staged) = staged {
            return Ok(staged);
        }
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn save(&self, record: EntitySnapshot) -> StoreResult<()> {
        let id = record
            .id
            .clone()
            .ok_or_else(|| StoreError::MissingId(record.entity_type.clone()))?;
        let key = record_key(&record.entity_type, &id);
        self.staged().insert(key, Some(record));
        Ok(())
    }

    async fn delete(&self, entity_type: &str, id: &str) -> StoreResult<bool> {
        let existed = self.fetch(entity_type, id).await?.is_some();
        self.staged().insert(record_key(entity_type, id), None);
        Ok(existed)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let staged = std::mem::take(&mut *self.staged());
        let mut records = self.records.write().await;
        for (key, record) in staged {
            match record {
                Some(record) => {
                    records.insert(key, record);
                }
                None => {
                    records.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.staged().clear();
        Ok(())
    }
}

/// Store for deployments without a persistence collaborator: reads find nothing and writes fail
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl EntityStore for NullStore {
    async fn fetch(&self, _entity_type: &str, _id: &str) -> StoreResult<Option<EntitySnapshot>> {
        Ok(None)
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(NullStore))
    }
}

#[async_trait]
impl StoreTransaction for NullStore {
    async fn fetch(&self, _entity_type: &str, _id: &str) -> StoreResult<Option<EntitySnapshot>> {
        Ok(None)
    }

    async fn save(&self, _record: EntitySnapshot) -> StoreResult<()> {
        Err(StoreError::Unavailable("no entity store configured".to_string()))
    }

    async fn delete(&self, _entity_type: &str, _id: &str) -> StoreResult<bool> {
        Err(StoreError::Unavailable("no entity store configured".to_string()))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_applies_staged_writes() {
        let store = InMemoryStore::new();
        store
            .insert(EntitySnapshot::new("Widget", "1").with_field("approved", false))
            .await
            .unwrap();

        let tx = store.begin().await.unwrap();
        tx.save(EntitySnapshot::new("Widget", "1").with_field("approved", true)).await.unwrap();
        tx.save(EntitySnapshot::new("Note", "n1")).await.unwrap();

        // Not visible outside the transaction until commit
        assert_eq!(store.get("widget", "1").await.unwrap().get_bool("approved"), Some(false));
        assert_eq!(tx.fetch("Widget", "1").await.unwrap().unwrap().get_bool("approved"), Some(true));

        tx.commit().await.unwrap();
        assert_eq!(store.get("Widget", "1").await.unwrap().get_bool("approved"), Some(true));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = InMemoryStore::new();
        store.insert(EntitySnapshot::new("Widget", "1")).await.unwrap();

        let tx = store.begin().await.unwrap();
        assert!(tx.delete("Widget", "1").await.unwrap());
        tx.save(EntitySnapshot::new("Widget", "2")).await.unwrap();
        assert!(tx.fetch("Widget", "1").await.unwrap().is_none());
        tx.rollback().await.unwrap();

        assert!(store.get("Widget", "1").await.is_some());
        assert!(store.get("Widget", "2").await.is_none());
    }

    #[tokio::test]
    async fn test_records_without_id_are_rejected() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.insert(EntitySnapshot::unsaved("Widget")).await,
            Err(StoreError::MissingId(_))
        ));

        let tx = NullStore.begin().await.unwrap();
        assert!(tx.save(EntitySnapshot::new("Widget", "1")).await.is_err());
    }
}
