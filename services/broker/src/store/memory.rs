//! In-memory record store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{InstanceStore, StoreError};
use crate::record::InstanceRecord;

#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    records: RwLock<BTreeMap<String, InstanceRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail, simulating a lost database.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self, instance_id: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt {
                instance_id: instance_id.to_string(),
                reason: "store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn create(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        self.check_writable(&record.instance_id)?;
        let mut records = self.records.write().await;
        if records.contains_key(&record.instance_id) {
            return Err(StoreError::Conflict(record.instance_id.clone()));
        }
        records.insert(record.instance_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, instance_id: &str) -> Result<InstanceRecord, StoreError> {
        self.records
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))
    }

    async fn update(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        self.check_writable(&record.instance_id)?;
        let mut records = self.records.write().await;
        match records.get_mut(&record.instance_id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.instance_id.clone())),
        }
    }

    async fn delete(&self, instance_id: &str) -> Result<(), StoreError> {
        self.check_writable(instance_id)?;
        self.records
            .write()
            .await
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LifecycleStatus;
    use crate::testing;

    #[tokio::test]
    async fn test_create_rejects_duplicate() {
        let store = MemoryInstanceStore::new();
        let first = testing::record("inst-1", LifecycleStatus::Provisioning);
        store.create(&first).await.unwrap();

        let mut second = first.clone();
        second.status = LifecycleStatus::Ready;
        let err = store.create(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stored = store.get("inst-1").await.unwrap();
        assert_eq!(stored.status, LifecycleStatus::Provisioning);
    }

    #[tokio::test]
    async fn test_get_update_delete() {
        let store = MemoryInstanceStore::new();
        assert!(matches!(
            store.get("missing").await,
            Err(StoreError::NotFound(_))
        ));

        let mut record = testing::record("inst-1", LifecycleStatus::Provisioning);
        assert!(matches!(
            store.update(&record).await,
            Err(StoreError::NotFound(_))
        ));

        store.create(&record).await.unwrap();
        record.status = LifecycleStatus::Ready;
        store.update(&record).await.unwrap();
        assert_eq!(
            store.get("inst-1").await.unwrap().status,
            LifecycleStatus::Ready
        );

        store.delete("inst-1").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryInstanceStore::new();
        store.set_fail_writes(true);
        let record = testing::record("inst-1", LifecycleStatus::Provisioning);
        assert!(store.create(&record).await.is_err());
    }
}
