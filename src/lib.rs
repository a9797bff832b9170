//! LeaseKeeper - Lease-Based Leader Election
//!
//! Replicas of a process contend for exclusive leadership through a single
//! shared, versioned lock record. There is no consensus protocol: the store's
//! optimistic-concurrency check decides every race, and a leader that stops
//! renewing is replaced once its lease lapses.
//!
//! # Architecture
//!
//! - [`lock`]: the lock record and the stores that hold it (in-memory,
//!   SQLite, or a remote coordination server)
//! - [`election`]: the acquire/renew/release state machine, the client loop
//!   driving it, and leadership callbacks
//! - [`api`]: the coordination server exposing a store over HTTP
//!
//! # Safety
//!
//! Mutual exclusion holds only if leader work stops when its scope is
//! cancelled, and only while clock drift stays well inside
//! `lease_duration - renew_deadline`.

pub mod config;
pub mod error;
pub mod clock;
pub mod lock;
pub mod election;
pub mod api;

pub use config::LeaseKeeperConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::LeaseKeeperConfig;
    pub use crate::error::{Error, Result};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::lock::{LeaseKey, LeaseLock, LeaseRecord, LockStore};
    pub use crate::election::{ElectionClient, ElectionConfig, LeaderCallbacks, LeaderEvent};
    pub use tokio_util::sync::CancellationToken;
}
