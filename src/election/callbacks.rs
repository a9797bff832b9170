//! Leadership Notifications
//!
//! The dispatcher owns the leader-work task and the cancellation scope handed
//! to it. Transitions are delivered two ways: to the host's
//! [`LeaderCallbacks`], and as [`LeaderEvent`]s on a broadcast channel.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Host hooks for leadership transitions
#[async_trait]
pub trait LeaderCallbacks: Send + Sync + 'static {
    /// Leader-mode work.
    ///
    /// Runs on its own task. `scope` is the only authoritative signal to stop,
    /// and the work must return promptly once it is cancelled.
    async fn on_started_leading(&self, scope: CancellationToken);

    /// Called once per lost leadership, after leader work has returned
    async fn on_stopped_leading(&self) {}

    /// Called when the observed leader changes (including to this replica).
    ///
    /// Runs on the election loop, so it must not block.
    async fn on_new_leader(&self, _identity: &str) {}
}

/// Leadership transition, as seen by this replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderEvent {
    /// This replica acquired the lease
    StartedLeading,
    /// This replica lost or released the lease and leader work has stopped
    StoppedLeading,
    /// A different holder was observed
    NewLeader(String),
}

/// Running leader work
struct ActiveLeadership {
    scope: CancellationToken,
    handle: JoinHandle<()>,
}

/// Delivers leadership transitions exactly once each
pub struct CallbackDispatcher {
    callbacks: Arc<dyn LeaderCallbacks>,
    events: broadcast::Sender<LeaderEvent>,
    /// Leader last passed to `on_new_leader`
    reported_leader: Option<String>,
    active: Option<ActiveLeadership>,
    /// Leader work was halted and `on_stopped_leading` is still owed
    stop_pending: bool,
    /// How often to complain about leader work that ignores cancellation
    stall_warning: Duration,
}

impl CallbackDispatcher {
    /// Create a dispatcher
    pub fn new(callbacks: Arc<dyn LeaderCallbacks>, stall_warning: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            callbacks,
            events,
            reported_leader: None,
            active: None,
            stop_pending: false,
            stall_warning,
        }
    }

    /// Subscribe to leadership events
    pub fn subscribe(&self) -> broadcast::Receiver<LeaderEvent> {
        self.events.subscribe()
    }

    /// Leader last reported through `on_new_leader`
    pub fn reported_leader(&self) -> Option<&str> {
        self.reported_leader.as_deref()
    }

    /// Check whether leader work is running
    pub fn is_leading(&self) -> bool {
        self.active.is_some()
    }

    fn publish(&self, event: LeaderEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Report an observed holder; duplicates and empty holders are ignored
    pub async fn observe_leader(&mut self, identity: &str) {
        if identity.is_empty() || self.reported_leader.as_deref() == Some(identity) {
            return;
        }

        self.reported_leader = Some(identity.to_string());
        self.callbacks.on_new_leader(identity).await;
        self.publish(LeaderEvent::NewLeader(identity.to_string()));
    }

    /// Spawn leader work under `scope`.
    ///
    /// Does nothing if leader work is already running.
    pub fn start_leading(&mut self, scope: CancellationToken) {
        if self.active.is_some() {
            tracing::warn!("Leader work already running, not starting it twice");
            return;
        }

        let callbacks = Arc::clone(&self.callbacks);
        let work_scope = scope.clone();
        let handle = tokio::spawn(async move {
            callbacks.on_started_leading(work_scope).await;
        });

        self.active = Some(ActiveLeadership { scope, handle });
        self.stop_pending = false;
        self.publish(LeaderEvent::StartedLeading);
    }

    /// Cancel the leader scope and wait, without a bound, for leader work to
    /// return.
    pub async fn halt_leader_work(&mut self) {
        let Some(ActiveLeadership { scope, mut handle }) = self.active.take() else {
            return;
        };

        scope.cancel();
        let started = tokio::time::Instant::now();
        loop {
            tokio::select! {
                joined = &mut handle => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("Leader work panicked: {}", e);
                        }
                    }
                    break;
                }
                _ = tokio::time::sleep(self.stall_warning) => {
                    tracing::warn!(
                        "Leader work has not stopped {:?} after cancellation; still waiting",
                        started.elapsed()
                    );
                }
            }
        }

        self.stop_pending = true;
    }

    /// Deliver `on_stopped_leading` once for the last halted leadership
    pub async fn notify_stopped_leading(&mut self) {
        if !self.stop_pending {
            return;
        }

        self.stop_pending = false;
        self.callbacks.on_stopped_leading().await;
        self.publish(LeaderEvent::StoppedLeading);
    }
}
