//! Lease-based leader election.
//!
//! Mirrors the coordination.k8s.io lease protocol: a replica becomes leader by
//! writing its identity into a shared lease and stays leader by renewing it.
//! A lease held by someone else counts as expired once it has not changed for
//! `lease_duration`, measured on the local clock from when this replica first
//! saw that version of the record, so clock skew between nodes does not matter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::LeaderCallbacks;
use crate::provider::ProviderError;

/// Name of the lease shared by all agent replicas of a cluster.
pub const LEASE_NAME: &str = "telemetruum-agent-kubernetes-collector";

/// Duration written into the lease when it is released.
const RELEASED_LEASE_DURATION: Duration = Duration::from_secs(1);

/// Contents of the shared lease.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeaseRecord {
    /// Current holder; empty once released.
    pub holder_identity: String,
    pub lease_duration: Duration,
    pub acquire_time: Option<DateTime<Utc>>,
    pub renew_time: Option<DateTime<Utc>>,
    pub transitions: i32,
    /// Optimistic-concurrency token of the stored object.
    pub resource_version: Option<String>,
}

/// Storage of the shared lease.
///
/// `update` must fail when `record.resource_version` no longer matches the
/// stored object.
#[async_trait]
pub trait LeaseLock: Send + Sync {
    async fn get(&self) -> Result<Option<LeaseRecord>, ProviderError>;

    async fn create(&self, record: &LeaseRecord) -> Result<LeaseRecord, ProviderError>;

    async fn update(&self, record: &LeaseRecord) -> Result<LeaseRecord, ProviderError>;

    /// Human readable lock location, for logs.
    fn describe(&self) -> String;
}

/// Timing of the election loop.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
    pub release_on_cancel: bool,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(60),
            renew_deadline: Duration::from_secs(15),
            retry_period: Duration::from_secs(5),
            release_on_cancel: true,
        }
    }
}

struct Observed {
    record: LeaseRecord,
    at: Instant,
}

/// Outcome of one acquire/renew attempt.
enum Attempt {
    Holding,
    HeldByOther,
}

/// Competes for the lease until cancelled.
pub struct LeaseElector {
    lock: Arc<dyn LeaseLock>,
    identity: String,
    config: ElectionConfig,
    observed: Option<Observed>,
}

impl LeaseElector {
    pub fn new(lock: Arc<dyn LeaseLock>, identity: impl Into<String>, config: ElectionConfig) -> Self {
        Self {
            lock,
            identity: identity.into(),
            config,
            observed: None,
        }
    }

    /// Runs the election loop, reporting to `callbacks`, until `token` is
    /// cancelled. A replica that loses the lease keeps campaigning.
    pub async fn run(mut self, token: CancellationToken, callbacks: Arc<dyn LeaderCallbacks>) {
        info!(
            identity = %self.identity,
            lock = %self.lock.describe(),
            "starting leader election"
        );

        let mut leading = false;
        let mut last_renew: Option<Instant> = None;
        let mut reported_leader: Option<String> = None;

        while !token.is_cancelled() {
            let renew_deadline = self.config.renew_deadline;
            let attempt = tokio::select! {
                _ = token.cancelled() => break,
                attempt = tokio::time::timeout(renew_deadline, self.try_acquire_or_renew()) => {
                    attempt.unwrap_or_else(|_| {
                        Err(ProviderError::Transport(format!(
                            "lease request timed out after {}s",
                            renew_deadline.as_secs()
                        )))
                    })
                }
            };

            match attempt {
                Ok(Attempt::Holding) => {
                    last_renew = Some(Instant::now());
                    if !leading {
                        leading = true;
                        callbacks.on_started_leading();
                    }
                }
                Ok(Attempt::HeldByOther) => {
                    if leading {
                        leading = false;
                        callbacks.on_stopped_leading();
                    }
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "failed to acquire or renew lease");
                    let deadline_passed = last_renew
                        .is_none_or(|at| at.elapsed() > self.config.renew_deadline);
                    if leading && deadline_passed {
                        leading = false;
                        callbacks.on_stopped_leading();
                    }
                }
            }

            if let Some(holder) = self.current_holder()
                && reported_leader.as_deref() != Some(holder)
            {
                reported_leader = Some(holder.to_string());
                callbacks.on_new_leader(holder);
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
        }

        if leading {
            if self.config.release_on_cancel {
                self.release().await;
            }
            callbacks.on_stopped_leading();
        }
        debug!(identity = %self.identity, "leader election stopped");
    }

    fn current_holder(&self) -> Option<&str> {
        self.observed
            .as_ref()
            .map(|o| o.record.holder_identity.as_str())
            .filter(|h| !h.is_empty())
    }

    fn observe(&mut self, record: LeaseRecord) {
        let changed = self.observed.as_ref().is_none_or(|o| o.record != record);
        if changed {
            self.observed = Some(Observed {
                record,
                at: Instant::now(),
            });
        }
    }

    async fn try_acquire_or_renew(&mut self) -> Result<Attempt, ProviderError> {
        let now = Utc::now();

        let Some(current) = self.lock.get().await? else {
            let record = LeaseRecord {
                holder_identity: self.identity.clone(),
                lease_duration: self.config.lease_duration,
                acquire_time: Some(now),
                renew_time: Some(now),
                transitions: 0,
                resource_version: None,
            };
            let created = self.lock.create(&record).await?;
            self.observe(created);
            return Ok(Attempt::Holding);
        };

        self.observe(current.clone());

        let held_by_other =
            !current.holder_identity.is_empty() && current.holder_identity != self.identity;
        if held_by_other
            && let Some(observed) = &self.observed
            && observed.at.elapsed() < current.lease_duration
        {
            return Ok(Attempt::HeldByOther);
        }

        let mut next = current;
        if next.holder_identity != self.identity {
            if !next.holder_identity.is_empty() {
                next.transitions += 1;
            }
            next.holder_identity = self.identity.clone();
            next.acquire_time = Some(now);
        }
        next.renew_time = Some(now);
        next.lease_duration = self.config.lease_duration;

        let updated = self.lock.update(&next).await?;
        self.observe(updated);
        Ok(Attempt::Holding)
    }

    async fn release(&mut self) {
        let Some(observed) = &self.observed else {
            return;
        };
        if observed.record.holder_identity != self.identity {
            return;
        }

        let mut released = observed.record.clone();
        released.holder_identity.clear();
        released.lease_duration = RELEASED_LEASE_DURATION;
        released.renew_time = Some(Utc::now());

        let result = tokio::time::timeout(self.config.renew_deadline, self.lock.update(&released)).await;
        match result {
            Ok(Ok(record)) => {
                info!(identity = %self.identity, "lease released");
                self.observe(record);
            }
            Ok(Err(e)) => warn!(identity = %self.identity, error = %e, "failed to release lease"),
            Err(_) => warn!(identity = %self.identity, "lease release timed out"),
        }
    }
}
