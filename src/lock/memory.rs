//! In-Memory Lock Backend
//!
//! Process-local backend. Contenders sharing one `Arc<MemoryBackend>` see the
//! same records, which is how the election tests race replicas.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::record::{LeaseKey, LeaseRecord, ResourceVersion, VersionedRecord};
use super::store::LeaseBackend;
use crate::error::{Error, Result};

/// Lock records held in a map, versions drawn from a global counter
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<BTreeMap<LeaseKey, VersionedRecord>>,
    next_version: AtomicU64,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_version(&self) -> ResourceVersion {
        let v = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        ResourceVersion::new(v.to_string())
    }
}

#[async_trait]
impl LeaseBackend for MemoryBackend {
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn create(&self, key: &LeaseKey, record: &LeaseRecord) -> Result<ResourceVersion> {
        let mut records = self.records.write().await;
        if records.contains_key(key) {
            return Err(Error::Conflict);
        }

        let version = self.issue_version();
        records.insert(
            key.clone(),
            VersionedRecord {
                record: record.clone(),
                version: version.clone(),
            },
        );
        Ok(version)
    }

    async fn update(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        let mut records = self.records.write().await;
        let current = records.get_mut(key).ok_or(Error::NotFound)?;
        if &current.version != expected {
            return Err(Error::Conflict);
        }

        let version = self.issue_version();
        current.record = record.clone();
        current.version = version.clone();
        Ok(version)
    }

    async fn list(&self) -> Result<Vec<(LeaseKey, VersionedRecord)>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let backend = MemoryBackend::new();
        let key = LeaseKey::new("default", "example");
        let record = LeaseRecord::acquired("a", Duration::from_secs(60), Utc::now());

        backend.create(&key, &record).await.unwrap();
        assert!(matches!(
            backend.create(&key, &record).await,
            Err(Error::Conflict)
        ));
        assert_eq!(backend.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_is_fenced() {
        let backend = MemoryBackend::new();
        let key = LeaseKey::new("default", "example");
        let record = LeaseRecord::acquired("a", Duration::from_secs(60), Utc::now());

        let v1 = backend.create(&key, &record).await.unwrap();
        let v2 = backend.update(&key, &record, &v1).await.unwrap();
        assert_ne!(v1, v2);

        let mut stolen = record.clone();
        stolen.holder_identity = "b".to_string();
        assert!(matches!(
            backend.update(&key, &stolen, &v1).await,
            Err(Error::Conflict)
        ));

        let stored = backend.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.record.holder_identity, "a");
        assert_eq!(stored.version, v2);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let backend = MemoryBackend::new();
        let key = LeaseKey::new("default", "missing");
        let record = LeaseRecord::acquired("a", Duration::from_secs(60), Utc::now());

        assert!(matches!(
            backend.update(&key, &record, &ResourceVersion::new("1")).await,
            Err(Error::NotFound)
        ));
    }
}
