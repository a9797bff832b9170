//! Lock Record Types
//!
//! The single shared object replicas contend for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifies one lock record in a store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseKey {
    /// Scope the lock lives in
    pub namespace: String,
    /// Lock name within the namespace
    pub name: String,
}

impl LeaseKey {
    /// Create a new lease key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Check that both parts are present
    pub fn is_valid(&self) -> bool {
        !self.namespace.is_empty() && !self.name.is_empty()
    }
}

impl std::fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Opaque store version used for compare-and-swap writes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    /// Wrap a store-issued token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Leader election record stored in the shared lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Current leader; empty when unheld
    pub holder_identity: String,
    /// TTL the holder commits to
    pub lease_duration_seconds: u64,
    /// When the current holder acquired the lock
    pub acquire_time: DateTime<Utc>,
    /// When the current holder last renewed
    pub renew_time: DateTime<Utc>,
    /// Number of times the holder has changed
    pub leader_transitions: u64,
}

impl LeaseRecord {
    /// Fresh record held by `identity`
    pub fn acquired(identity: &str, lease_duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            holder_identity: identity.to_string(),
            lease_duration_seconds: lease_seconds(lease_duration),
            acquire_time: now,
            renew_time: now,
            leader_transitions: 0,
        }
    }

    /// Check whether any identity holds the lock
    pub fn is_held(&self) -> bool {
        !self.holder_identity.is_empty()
    }

    /// Check whether `identity` is the holder
    pub fn is_held_by(&self, identity: &str) -> bool {
        self.is_held() && self.holder_identity == identity
    }

    /// Time elapsed since the last renewal, as seen at `now`.
    ///
    /// Negative when the holder's clock runs ahead of ours.
    pub fn since_renewal(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.renew_time
    }

    /// Check whether the lease has lapsed at `now` given `lease_duration`
    pub fn is_expired(&self, now: DateTime<Utc>, lease_duration: Duration) -> bool {
        let lease = chrono::Duration::from_std(lease_duration).unwrap_or(chrono::Duration::MAX);
        self.since_renewal(now) > lease
    }
}

/// Lease durations are recorded in whole seconds, never less than one
pub fn lease_seconds(lease_duration: Duration) -> u64 {
    lease_duration.as_secs().max(1)
}

/// A record together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// Record contents
    pub record: LeaseRecord,
    /// Version to supply on the next write
    pub version: ResourceVersion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_strict() {
        let start = Utc::now();
        let record = LeaseRecord::acquired("a", Duration::from_secs(60), start);

        let at_boundary = start + chrono::Duration::seconds(60);
        assert!(!record.is_expired(at_boundary, Duration::from_secs(60)));

        let past = start + chrono::Duration::seconds(61);
        assert!(record.is_expired(past, Duration::from_secs(60)));
    }

    #[test]
    fn test_holder_checks() {
        let mut record = LeaseRecord::acquired("a", Duration::from_secs(60), Utc::now());
        assert!(record.is_held_by("a"));
        assert!(!record.is_held_by("b"));

        record.holder_identity.clear();
        assert!(!record.is_held());
        assert!(!record.is_held_by(""));
    }

    #[test]
    fn test_wire_field_names() {
        let record = LeaseRecord::acquired("a", Duration::from_millis(500), Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["holderIdentity"], "a");
        assert_eq!(json["leaseDurationSeconds"], 1);
        assert_eq!(json["leaderTransitions"], 0);
    }
}
