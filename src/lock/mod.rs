//! Lock Store Module
//!
//! The shared, versioned lock record and the stores that persist it.

mod record;
mod store;
mod memory;
mod sqlite;
pub mod http;

use std::sync::Arc;

pub use record::{lease_seconds, LeaseKey, LeaseRecord, ResourceVersion, VersionedRecord};
pub use store::{LeaseBackend, LeaseLock, LockStore};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use http::HttpBackend;

use crate::config::{BackendKind, LeaseKeeperConfig};
use crate::error::Result;

/// Open the backend a contender should use
pub fn open_backend(config: &LeaseKeeperConfig) -> Result<Arc<dyn LeaseBackend>> {
    let backend: Arc<dyn LeaseBackend> = match config.store.backend {
        BackendKind::Http => Arc::new(HttpBackend::new(
            config.store.endpoint.clone(),
            config.store.auth_token.clone(),
            config.request_timeout(),
        )?),
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.store.path)?),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };
    Ok(backend)
}

/// Open the backend the coordination server serves from
pub fn open_server_backend(config: &LeaseKeeperConfig) -> Result<Arc<dyn LeaseBackend>> {
    let backend: Arc<dyn LeaseBackend> = match config.server.backend {
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.server.path)?),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Http => {
            return Err(crate::Error::Config(
                "server.backend must be sqlite or memory".into(),
            ))
        }
    };
    Ok(backend)
}
