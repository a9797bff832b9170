//! Election State Machine
//!
//! One acquire-or-renew attempt against the lock record, plus graceful
//! release. The machine never decides who wins a race: it reads, decides
//! whether it may write, and lets the store's compare-and-swap arbitrate.

use std::sync::Arc;
use chrono::{DateTime, Utc};

use super::ElectionConfig;
use crate::error::{Error, Result};
use crate::lock::{lease_seconds, LeaseRecord, LockStore, VersionedRecord};

/// Result of one acquire-or-renew attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// This replica holds the lease; contains the record as written
    AcquiredOrRenewed(LeaseRecord),
    /// Another replica holds a valid lease or won the race.
    ///
    /// Carries the record observed before the attempt, if any was read.
    Denied(Option<LeaseRecord>),
}

/// Acquire, renew and release logic for one lock record
pub struct ElectionStateMachine {
    store: Arc<dyn LockStore>,
    config: ElectionConfig,
    /// Last record read or written, with the version to write against
    observed: Option<VersionedRecord>,
}

impl ElectionStateMachine {
    /// Create a state machine for `config.identity()`
    pub fn new(store: Arc<dyn LockStore>, config: ElectionConfig) -> Self {
        Self {
            store,
            config,
            observed: None,
        }
    }

    /// Name of the lock, for logs
    pub fn describe(&self) -> String {
        self.store.describe()
    }

    /// Last record this replica observed
    pub fn observed(&self) -> Option<&LeaseRecord> {
        self.observed.as_ref().map(|o| &o.record)
    }

    /// Attempt to acquire the lease, or renew it if already held.
    ///
    /// Store failures are returned as errors, never folded into `Denied`.
    pub async fn try_acquire_or_renew(&mut self, now: DateTime<Utc>) -> Result<AttemptOutcome> {
        let identity = self.config.identity();

        let Some(current) = self.store.get().await? else {
            let record = LeaseRecord::acquired(identity, self.config.lease_duration(), now);
            return match self.store.create(&record).await {
                Ok(version) => {
                    self.observed = Some(VersionedRecord {
                        record: record.clone(),
                        version,
                    });
                    Ok(AttemptOutcome::AcquiredOrRenewed(record))
                }
                Err(Error::Conflict) => {
                    tracing::debug!("Lost race creating lease {}", self.describe());
                    self.observed = None;
                    Ok(AttemptOutcome::Denied(None))
                }
                Err(e) => Err(e),
            };
        };

        let observed_record = current.record.clone();
        let version = current.version.clone();
        self.observed = Some(current);

        let next = if observed_record.is_held_by(identity) {
            LeaseRecord {
                renew_time: now,
                lease_duration_seconds: lease_seconds(self.config.lease_duration()),
                ..observed_record.clone()
            }
        } else {
            if observed_record.is_held()
                && !observed_record.is_expired(now, self.config.lease_duration())
            {
                return Ok(AttemptOutcome::Denied(Some(observed_record)));
            }

            if observed_record.is_held() {
                tracing::info!(
                    "Lease {} held by {} expired (last renewed {}), attempting takeover",
                    self.describe(),
                    observed_record.holder_identity,
                    observed_record.renew_time
                );
            }

            LeaseRecord {
                holder_identity: identity.to_string(),
                lease_duration_seconds: lease_seconds(self.config.lease_duration()),
                acquire_time: now,
                renew_time: now,
                leader_transitions: observed_record.leader_transitions + 1,
            }
        };

        match self.store.update(&next, &version).await {
            Ok(version) => {
                self.observed = Some(VersionedRecord {
                    record: next.clone(),
                    version,
                });
                Ok(AttemptOutcome::AcquiredOrRenewed(next))
            }
            Err(Error::Conflict) | Err(Error::NotFound) => {
                tracing::debug!(
                    "Write to lease {} lost to a concurrent writer",
                    self.describe()
                );
                Ok(AttemptOutcome::Denied(Some(observed_record)))
            }
            Err(e) => Err(e),
        }
    }

    /// Clear the holder identity so the next contender need not wait out the
    /// lease.
    ///
    /// Returns `Ok(false)` without writing if the last observed record is not
    /// held by this replica. A `Conflict` means someone else already wrote and
    /// is also reported as `Ok(false)`.
    pub async fn release(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let Some(observed) = &self.observed else {
            return Ok(false);
        };
        if !observed.record.is_held_by(self.config.identity()) {
            return Ok(false);
        }

        let released = LeaseRecord {
            holder_identity: String::new(),
            lease_duration_seconds: 1,
            acquire_time: now,
            renew_time: now,
            leader_transitions: observed.record.leader_transitions,
        };

        match self.store.update(&released, &observed.version).await {
            Ok(version) => {
                self.observed = Some(VersionedRecord {
                    record: released,
                    version,
                });
                Ok(true)
            }
            Err(Error::Conflict) | Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use async_trait::async_trait;
    use crate::lock::{LeaseBackend, LeaseKey, LeaseLock, MemoryBackend, ResourceVersion};

    fn config(identity: &str) -> ElectionConfig {
        ElectionConfig::builder(identity)
            .lease_duration(Duration::from_secs(60))
            .renew_deadline(Duration::from_secs(15))
            .retry_period(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn machine(backend: &Arc<MemoryBackend>, identity: &str) -> ElectionStateMachine {
        let store = Arc::new(LeaseLock::new(
            Arc::clone(backend),
            LeaseKey::new("default", "example"),
        ));
        ElectionStateMachine::new(store, config(identity))
    }

    fn acquired(outcome: AttemptOutcome) -> LeaseRecord {
        match outcome {
            AttemptOutcome::AcquiredOrRenewed(record) => record,
            other => panic!("expected acquisition, got {:?}", other),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_acquire_absent_record() {
        let backend = Arc::new(MemoryBackend::new());
        let mut a = machine(&backend, "a");

        let record = acquired(a.try_acquire_or_renew(at(0)).await.unwrap());
        assert_eq!(record.holder_identity, "a");
        assert_eq!(record.acquire_time, at(0));
        assert_eq!(record.leader_transitions, 0);
        assert_eq!(record.lease_duration_seconds, 60);
    }

    #[tokio::test]
    async fn test_renew_keeps_acquire_time() {
        let backend = Arc::new(MemoryBackend::new());
        let mut a = machine(&backend, "a");

        a.try_acquire_or_renew(at(0)).await.unwrap();
        let record = acquired(a.try_acquire_or_renew(at(5)).await.unwrap());
        assert_eq!(record.acquire_time, at(0));
        assert_eq!(record.renew_time, at(5));
        assert_eq!(record.leader_transitions, 0);
    }

    #[tokio::test]
    async fn test_valid_lease_is_respected() {
        let backend = Arc::new(MemoryBackend::new());
        let mut a = machine(&backend, "a");
        let mut b = machine(&backend, "b");

        a.try_acquire_or_renew(at(0)).await.unwrap();
        let outcome = b.try_acquire_or_renew(at(60)).await.unwrap();
        match outcome {
            AttemptOutcome::Denied(Some(record)) => assert_eq!(record.holder_identity, "a"),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let backend = Arc::new(MemoryBackend::new());
        let mut a = machine(&backend, "a");
        let mut b = machine(&backend, "b");

        a.try_acquire_or_renew(at(0)).await.unwrap();
        a.try_acquire_or_renew(at(10)).await.unwrap();

        let record = acquired(b.try_acquire_or_renew(at(71)).await.unwrap());
        assert_eq!(record.holder_identity, "b");
        assert_eq!(record.acquire_time, at(71));
        assert_eq!(record.leader_transitions, 1);

        // The old holder now sees a valid lease held by someone else
        match a.try_acquire_or_renew(at(72)).await.unwrap() {
            AttemptOutcome::Denied(Some(record)) => assert_eq!(record.holder_identity, "b"),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_strict() {
        use crate::clock::{Clock, ManualClock};

        let backend = Arc::new(MemoryBackend::new());
        let clock = ManualClock::new(at(0));
        let mut a = machine(&backend, "a");
        let mut b = machine(&backend, "b");

        a.try_acquire_or_renew(clock.now()).await.unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(matches!(
            b.try_acquire_or_renew(clock.now()).await.unwrap(),
            AttemptOutcome::Denied(Some(_))
        ));

        clock.advance(Duration::from_millis(1));
        let record = acquired(b.try_acquire_or_renew(clock.now()).await.unwrap());
        assert_eq!(record.holder_identity, "b");
    }

    #[tokio::test]
    async fn test_late_renewal_wins_against_takeover() {
        let backend = Arc::new(MemoryBackend::new());
        let key = LeaseKey::new("default", "example");
        let mut a = machine(&backend, "a");
        let mut b = machine(&backend, "b");

        a.try_acquire_or_renew(at(0)).await.unwrap();
        let stale = backend.get(&key).await.unwrap().unwrap();

        // The dying holder renews after the contender read but before it writes
        a.try_acquire_or_renew(at(61)).await.unwrap();

        let takeover = LeaseRecord {
            holder_identity: "b".into(),
            ..stale.record.clone()
        };
        assert!(matches!(
            backend.update(&key, &takeover, &stale.version).await,
            Err(Error::Conflict)
        ));

        // And the state machine, re-reading, sees a fresh lease
        assert!(matches!(
            b.try_acquire_or_renew(at(62)).await.unwrap(),
            AttemptOutcome::Denied(Some(_))
        ));
    }

    #[tokio::test]
    async fn test_release_clears_holder() {
        let backend = Arc::new(MemoryBackend::new());
        let mut a = machine(&backend, "a");
        let mut b = machine(&backend, "b");

        a.try_acquire_or_renew(at(0)).await.unwrap();
        assert!(a.release(at(1)).await.unwrap());
        assert!(!a.observed().unwrap().is_held());

        // Released leases are free immediately, no expiry wait
        let record = acquired(b.try_acquire_or_renew(at(2)).await.unwrap());
        assert_eq!(record.leader_transitions, 1);
    }

    #[tokio::test]
    async fn test_release_without_lease_is_noop() {
        let backend = Arc::new(MemoryBackend::new());
        let mut a = machine(&backend, "a");
        let mut b = machine(&backend, "b");

        assert!(!b.release(at(0)).await.unwrap());
        a.try_acquire_or_renew(at(0)).await.unwrap();
        b.try_acquire_or_renew(at(1)).await.unwrap();
        assert!(!b.release(at(2)).await.unwrap());
        assert!(backend
            .get(&LeaseKey::new("default", "example"))
            .await
            .unwrap()
            .unwrap()
            .record
            .is_held_by("a"));
    }

    /// Store whose every call fails the same way
    struct FailingStore(fn() -> Error);

    #[async_trait]
    impl LockStore for FailingStore {
        fn describe(&self) -> String {
            "default/failing".into()
        }

        async fn get(&self) -> Result<Option<VersionedRecord>> {
            Err((self.0)())
        }

        async fn create(&self, _record: &LeaseRecord) -> Result<ResourceVersion> {
            Err((self.0)())
        }

        async fn update(
            &self,
            _record: &LeaseRecord,
            _expected: &ResourceVersion,
        ) -> Result<ResourceVersion> {
            Err((self.0)())
        }
    }

    #[tokio::test]
    async fn test_store_errors_are_not_denials() {
        let store = Arc::new(FailingStore(|| Error::StoreUnavailable("down".into())));
        let mut a = ElectionStateMachine::new(store, config("a"));
        assert!(matches!(
            a.try_acquire_or_renew(at(0)).await,
            Err(Error::StoreUnavailable(_))
        ));
    }
}
