//! Lock Store Contracts
//!
//! `LockStore` is the only thing the election core knows about persistence.
//! `LeaseBackend` is the keyed form implemented by each concrete store, and
//! `LeaseLock` binds a backend to one record.

use std::sync::Arc;
use async_trait::async_trait;

use super::record::{LeaseKey, LeaseRecord, ResourceVersion, VersionedRecord};
use crate::error::Result;

/// Optimistic-concurrency access to a single lock record.
///
/// `create` fails with [`Error::Conflict`](crate::Error::Conflict) if a record
/// exists; `update` fails with `Conflict` if `expected` is stale and with
/// [`Error::NotFound`](crate::Error::NotFound) if the record is gone. Callers
/// must re-read after a `Conflict`, never overwrite blindly.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Human-readable name of the lock, for logs
    fn describe(&self) -> String;

    /// Read the record, `None` if it does not exist
    async fn get(&self) -> Result<Option<VersionedRecord>>;

    /// Create the record
    async fn create(&self, record: &LeaseRecord) -> Result<ResourceVersion>;

    /// Replace the record if it is still at `expected`
    async fn update(&self, record: &LeaseRecord, expected: &ResourceVersion)
        -> Result<ResourceVersion>;
}

/// Keyed lock record storage
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Read a record
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedRecord>>;

    /// Create a record, `Conflict` if present
    async fn create(&self, key: &LeaseKey, record: &LeaseRecord) -> Result<ResourceVersion>;

    /// Compare-and-swap a record
    async fn update(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion>;

    /// All records, ordered by key
    async fn list(&self) -> Result<Vec<(LeaseKey, VersionedRecord)>>;
}

/// A backend bound to one lock record
pub struct LeaseLock<B: ?Sized> {
    backend: Arc<B>,
    key: LeaseKey,
}

impl<B: ?Sized> LeaseLock<B> {
    /// Bind `backend` to the record at `key`
    pub fn new(backend: Arc<B>, key: LeaseKey) -> Self {
        Self { backend, key }
    }
}

impl<B: ?Sized> Clone for LeaseLock<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            key: self.key.clone(),
        }
    }
}

#[async_trait]
impl<B: LeaseBackend + ?Sized> LockStore for LeaseLock<B> {
    fn describe(&self) -> String {
        self.key.to_string()
    }

    async fn get(&self) -> Result<Option<VersionedRecord>> {
        self.backend.get(&self.key).await
    }

    async fn create(&self, record: &LeaseRecord) -> Result<ResourceVersion> {
        self.backend.create(&self.key, record).await
    }

    async fn update(
        &self,
        record: &LeaseRecord,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        self.backend.update(&self.key, record, expected).await
    }
}
