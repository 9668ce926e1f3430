//! Leadership gate for cluster-singleton facts.
//!
//! Only one agent replica per cluster should publish facts that describe the
//! cluster as a whole. A [`LeaseElector`] competes for a shared lease and
//! reports through [`LeaderCallbacks`]; a [`LeadershipTracker`] turns those
//! notifications into a [`LeadershipState`] that providers read through a
//! cloneable [`LeaderGate`].
//!
//! ```text
//!   LeaseElector ──callbacks──► LeadershipTracker ──watch──► LeaderGate (providers)
//! ```

mod election;

pub use election::{ElectionConfig, LEASE_NAME, LeaseElector, LeaseLock, LeaseRecord};

#[cfg(test)]
pub(crate) use election::tests::MemoryLease;

use tokio::sync::watch;
use tracing::info;

/// Leadership as seen by this replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeadershipState {
    /// No election outcome observed yet.
    #[default]
    Undetermined,
    Follower,
    Leader,
}

/// Notifications emitted by the coordination loop.
///
/// Implementations must tolerate being called from any task.
pub trait LeaderCallbacks: Send + Sync {
    /// This replica acquired the lease.
    fn on_started_leading(&self);

    /// This replica lost or released the lease.
    fn on_stopped_leading(&self);

    /// A (possibly different) replica was observed holding the lease.
    fn on_new_leader(&self, identity: &str);
}

/// Read side of the leadership state.
#[derive(Debug, Clone)]
pub struct LeaderGate {
    rx: watch::Receiver<LeadershipState>,
}

impl LeaderGate {
    pub fn state(&self) -> LeadershipState {
        *self.rx.borrow()
    }

    pub fn is_leader(&self) -> bool {
        self.state() == LeadershipState::Leader
    }
}

/// Write side of the leadership state, driven by election callbacks.
#[derive(Debug)]
pub struct LeadershipTracker {
    identity: String,
    tx: watch::Sender<LeadershipState>,
}

impl LeadershipTracker {
    pub fn new(identity: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(LeadershipState::Undetermined);
        Self {
            identity: identity.into(),
            tx,
        }
    }

    pub fn gate(&self) -> LeaderGate {
        LeaderGate {
            rx: self.tx.subscribe(),
        }
    }

    pub fn state(&self) -> LeadershipState {
        *self.tx.borrow()
    }

    fn set(&self, next: LeadershipState) {
        let previous = self.tx.send_replace(next);
        if previous != next {
            info!(identity = %self.identity, from = ?previous, to = ?next, "leadership changed");
        }
    }
}

impl LeaderCallbacks for LeadershipTracker {
    fn on_started_leading(&self) {
        info!("started leading, collecting cluster metrics");
        self.set(LeadershipState::Leader);
    }

    fn on_stopped_leading(&self) {
        info!("stopped leading, no longer collecting cluster metrics");
        self.set(LeadershipState::Follower);
    }

    fn on_new_leader(&self, identity: &str) {
        info!(leader = %identity, "new leader observed");
        if identity == self.identity {
            self.set(LeadershipState::Leader);
        } else {
            self.set(LeadershipState::Follower);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_undetermined() {
        let tracker = LeadershipTracker::new("pod-a");
        assert_eq!(tracker.state(), LeadershipState::Undetermined);
        assert!(!tracker.gate().is_leader());
    }

    #[test]
    fn test_transitions() {
        let tracker = LeadershipTracker::new("pod-a");
        let gate = tracker.gate();

        tracker.on_new_leader("pod-b");
        assert_eq!(gate.state(), LeadershipState::Follower);

        tracker.on_new_leader("pod-a");
        assert_eq!(gate.state(), LeadershipState::Leader);

        tracker.on_stopped_leading();
        assert_eq!(gate.state(), LeadershipState::Follower);

        tracker.on_started_leading();
        assert!(gate.is_leader());

        tracker.on_new_leader("pod-c");
        assert_eq!(gate.state(), LeadershipState::Follower);
    }

    #[test]
    fn test_gate_created_before_change_sees_update() {
        let tracker = LeadershipTracker::new("pod-a");
        let early = tracker.gate();
        tracker.on_started_leading();
        let late = tracker.gate();
        assert!(early.is_leader());
        assert!(late.is_leader());
    }

    #[tokio::test]
    async fn test_callbacks_from_other_task() {
        let tracker = std::sync::Arc::new(LeadershipTracker::new("pod-a"));
        let gate = tracker.gate();
        let remote = tracker.clone();
        tokio::spawn(async move { remote.on_started_leading() })
            .await
            .unwrap();
        assert!(gate.is_leader());
    }
}
