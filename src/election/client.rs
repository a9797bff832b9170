//! Election Client
//!
//! Drives the state machine on a fixed cadence and owns the leader lifecycle:
//! `Follower -> Leading -> Releasing -> Follower`, strictly in that order.
//!
//! The renew deadline is measured on the monotonic `tokio::time::Instant`.
//! The [`Clock`] only stamps records and judges their expiry, so a wall
//! clock step cannot keep a stalled leader alive.

use std::sync::Arc;
use std::time::Duration;
use rand::Rng;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::callbacks::{CallbackDispatcher, LeaderCallbacks, LeaderEvent};
use super::machine::{AttemptOutcome, ElectionStateMachine};
use super::{ElectionConfig, ElectionState};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::lock::LockStore;

/// Why the renew loop stopped
enum RenewExit {
    /// Renewal deadline passed or another holder took over
    Lost,
    /// Top-level shutdown requested
    Cancelled,
    /// The store can never succeed
    Fatal(Error),
}

/// Runs one replica's election
pub struct ElectionClient {
    config: ElectionConfig,
    machine: ElectionStateMachine,
    dispatcher: CallbackDispatcher,
    clock: Arc<dyn Clock>,
    state: watch::Sender<ElectionState>,
    /// When the last successful acquire or renew was started
    last_renewal: Option<Instant>,
}

impl ElectionClient {
    /// Create a client using the system clock
    pub fn new(
        config: ElectionConfig,
        store: Arc<dyn LockStore>,
        callbacks: Arc<dyn LeaderCallbacks>,
    ) -> Self {
        let dispatcher = CallbackDispatcher::new(callbacks, config.renew_deadline());
        let (state, _) = watch::channel(ElectionState::Follower);
        Self {
            machine: ElectionStateMachine::new(store, config.clone()),
            config,
            dispatcher,
            clock: Arc::new(SystemClock),
            state,
            last_renewal: None,
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribe to leadership events
    pub fn subscribe(&self) -> broadcast::Receiver<LeaderEvent> {
        self.dispatcher.subscribe()
    }

    /// Watch the local election state while `run` drives it
    pub fn watch_state(&self) -> watch::Receiver<ElectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ElectionState) {
        self.state.send_replace(state);
    }

    /// Contend for leadership until `shutdown` is cancelled.
    ///
    /// Losing the lease is not an error: the client stops leader work,
    /// notifies, and goes back to following. Only fatal store errors are
    /// returned.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            "Starting leader election for lease {} as {}",
            self.machine.describe(),
            self.config.identity()
        );

        loop {
            if !self.acquire(&shutdown).await? {
                tracing::info!("Leader election stopped before acquiring the lease");
                return Ok(());
            }

            let exit = self.renew(&shutdown).await;

            self.set_state(ElectionState::Releasing);
            self.dispatcher.halt_leader_work().await;

            match exit {
                RenewExit::Cancelled => {
                    if self.config.release_on_cancel() {
                        self.release().await;
                    }
                    self.dispatcher.notify_stopped_leading().await;
                    self.set_state(ElectionState::Follower);
                    return Ok(());
                }
                RenewExit::Lost => {
                    tracing::info!("Lost leadership of lease {}", self.machine.describe());
                    self.dispatcher.notify_stopped_leading().await;
                    self.set_state(ElectionState::Follower);
                    self.last_renewal = None;
                }
                RenewExit::Fatal(e) => {
                    tracing::error!(
                        "Giving up lease {} after fatal store error: {}",
                        self.machine.describe(),
                        e
                    );
                    self.dispatcher.notify_stopped_leading().await;
                    self.set_state(ElectionState::Follower);
                    return Err(e);
                }
            }
        }
    }

    /// Poll until the lease is acquired.
    ///
    /// Returns `Ok(false)` if shutdown was requested first.
    async fn acquire(&mut self, shutdown: &CancellationToken) -> Result<bool> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(false);
            }

            let started = Instant::now();
            let now = self.clock.now();
            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return Ok(false),
                attempt = self.machine.try_acquire_or_renew(now) => attempt,
            };

            match attempt {
                Ok(AttemptOutcome::AcquiredOrRenewed(record)) => {
                    tracing::info!(
                        "Successfully acquired lease {} (transitions: {})",
                        self.machine.describe(),
                        record.leader_transitions
                    );
                    self.dispatcher.observe_leader(&record.holder_identity).await;
                    self.last_renewal = Some(started);
                    self.set_state(ElectionState::Leading);
                    self.dispatcher.start_leading(shutdown.child_token());
                    return Ok(true);
                }
                Ok(AttemptOutcome::Denied(observed)) => {
                    if let Some(record) = observed {
                        tracing::debug!(
                            "Lease {} is held by {}",
                            self.machine.describe(),
                            record.holder_identity
                        );
                        self.dispatcher.observe_leader(&record.holder_identity).await;
                    }
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(
                        "Fatal error reading lease {}: {}",
                        self.machine.describe(),
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "Error retrieving lease {}: {}",
                        self.machine.describe(),
                        e
                    );
                }
            }

            let wait = self.follower_wait();
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(false),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Renew every retry period until renewal fails past the deadline
    async fn renew(&mut self, shutdown: &CancellationToken) -> RenewExit {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return RenewExit::Cancelled,
                _ = tokio::time::sleep(self.config.retry_period()) => {}
            }

            let started = Instant::now();
            let deadline = self.last_renewal.unwrap_or(started) + self.config.renew_deadline();
            let remaining = deadline.saturating_duration_since(started);
            if remaining.is_zero() {
                return self.deadline_exceeded();
            }

            let now = self.clock.now();
            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return RenewExit::Cancelled,
                attempt = tokio::time::timeout(
                    remaining,
                    self.machine.try_acquire_or_renew(now),
                ) => attempt,
            };

            match attempt {
                Ok(Ok(AttemptOutcome::AcquiredOrRenewed(_))) => {
                    tracing::debug!("Renewed lease {}", self.machine.describe());
                    self.last_renewal = Some(started);
                    continue;
                }
                Ok(Ok(AttemptOutcome::Denied(Some(record))))
                    if record.is_held() && !record.is_held_by(self.config.identity()) =>
                {
                    tracing::info!(
                        "Lease {} was taken over by {}",
                        self.machine.describe(),
                        record.holder_identity
                    );
                    self.dispatcher.observe_leader(&record.holder_identity).await;
                    return RenewExit::Lost;
                }
                Ok(Ok(AttemptOutcome::Denied(_))) => {
                    // Our own write lost a race; retried until the deadline
                    tracing::debug!(
                        "Renewal of lease {} conflicted, retrying",
                        self.machine.describe()
                    );
                }
                Ok(Err(e)) if e.is_fatal() => return RenewExit::Fatal(e),
                Ok(Err(e)) => {
                    tracing::warn!("Failed to renew lease {}: {}", self.machine.describe(), e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Renewal of lease {} did not complete before the renew deadline",
                        self.machine.describe()
                    );
                }
            }

            if Instant::now() >= deadline {
                return self.deadline_exceeded();
            }
        }
    }

    fn deadline_exceeded(&self) -> RenewExit {
        tracing::info!(
            "Failed to renew lease {} within {:?}",
            self.machine.describe(),
            self.config.renew_deadline()
        );
        RenewExit::Lost
    }

    /// Best-effort release on shutdown; the lease expires on its own if this fails
    async fn release(&mut self) {
        match self.machine.release(self.clock.now()).await {
            Ok(true) => tracing::info!("Released lease {}", self.machine.describe()),
            Ok(false) => tracing::info!(
                "Lease {} no longer held by us, nothing to release",
                self.machine.describe()
            ),
            Err(e) => tracing::warn!(
                "Failed to release lease {}, it will expire after {:?}: {}",
                self.machine.describe(),
                self.config.lease_duration(),
                e
            ),
        }
    }

    fn follower_wait(&self) -> Duration {
        let base = self.config.retry_period();
        let jitter = self.config.retry_jitter();
        if jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..jitter);
        base.mul_f64(factor)
    }
}
