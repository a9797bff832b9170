//! Leader Election Module
//!
//! Lease-based leader election over a single shared lock record. Replicas
//! poll the record through [`ElectionStateMachine`]; the store's
//! compare-and-swap picks exactly one winner whenever the lease is free or
//! lapsed, and the winner keeps it by renewing before `renew_deadline`.
//!
//! Correctness assumes clock drift and scheduling delay between replicas stay
//! well inside `lease_duration - renew_deadline`.

mod machine;
mod callbacks;
mod client;

use std::time::Duration;

pub use machine::{AttemptOutcome, ElectionStateMachine};
pub use callbacks::{CallbackDispatcher, LeaderCallbacks, LeaderEvent};
pub use client::ElectionClient;

use crate::error::{Error, Result};

/// Local election state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Polling for a free or lapsed lease
    Follower,
    /// Holding and renewing the lease
    Leading,
    /// Stopping leader work after losing the lease
    Releasing,
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionState::Follower => write!(f, "FOLLOWER"),
            ElectionState::Leading => write!(f, "LEADING"),
            ElectionState::Releasing => write!(f, "RELEASING"),
        }
    }
}

/// Election configuration, validated on construction
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    identity: String,
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
    release_on_cancel: bool,
    retry_jitter: f64,
}

impl ElectionConfig {
    /// Start building a configuration for `identity`
    pub fn builder(identity: impl Into<String>) -> ElectionConfigBuilder {
        ElectionConfigBuilder {
            identity: identity.into(),
            lease_duration: Duration::from_secs(60),
            renew_deadline: Duration::from_secs(15),
            retry_period: Duration::from_secs(5),
            release_on_cancel: true,
            retry_jitter: 0.0,
        }
    }

    /// Holder identity of this replica
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// How long a lease stays valid without renewal
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// How long the leader retries renewal before conceding
    pub fn renew_deadline(&self) -> Duration {
        self.renew_deadline
    }

    /// Interval between attempts
    pub fn retry_period(&self) -> Duration {
        self.retry_period
    }

    /// Whether to clear the holder on shutdown
    pub fn release_on_cancel(&self) -> bool {
        self.release_on_cancel
    }

    /// Random fraction added to follower waits
    pub fn retry_jitter(&self) -> f64 {
        self.retry_jitter
    }
}

/// Builder for [`ElectionConfig`]
#[derive(Debug, Clone)]
pub struct ElectionConfigBuilder {
    identity: String,
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
    release_on_cancel: bool,
    retry_jitter: f64,
}

impl ElectionConfigBuilder {
    pub fn lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn renew_deadline(mut self, renew_deadline: Duration) -> Self {
        self.renew_deadline = renew_deadline;
        self
    }

    pub fn retry_period(mut self, retry_period: Duration) -> Self {
        self.retry_period = retry_period;
        self
    }

    pub fn release_on_cancel(mut self, release_on_cancel: bool) -> Self {
        self.release_on_cancel = release_on_cancel;
        self
    }

    pub fn retry_jitter(mut self, retry_jitter: f64) -> Self {
        self.retry_jitter = retry_jitter;
        self
    }

    /// Validate and build.
    ///
    /// Requires `retry_period < renew_deadline < lease_duration`.
    pub fn build(self) -> Result<ElectionConfig> {
        if self.identity.is_empty() {
            return Err(Error::Config("election identity cannot be empty".into()));
        }
        if self.retry_period.is_zero() {
            return Err(Error::Config("retry period must be positive".into()));
        }
        if self.renew_deadline <= self.retry_period {
            return Err(Error::Config(format!(
                "renew deadline ({:?}) must be greater than retry period ({:?})",
                self.renew_deadline, self.retry_period
            )));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(Error::Config(format!(
                "lease duration ({:?}) must be greater than renew deadline ({:?})",
                self.lease_duration, self.renew_deadline
            )));
        }
        if !self.retry_jitter.is_finite() || self.retry_jitter < 0.0 {
            return Err(Error::Config("retry jitter must be non-negative".into()));
        }

        Ok(ElectionConfig {
            identity: self.identity,
            lease_duration: self.lease_duration,
            renew_deadline: self.renew_deadline,
            retry_period: self.retry_period,
            release_on_cancel: self.release_on_cancel,
            retry_jitter: self.retry_jitter,
        })
    }
}
