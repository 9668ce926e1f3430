//! Interval-driven collector runner.
//!
//! A [`CollectorRunner`] binds one [`CollectorState`] type to an ordered list
//! of [`DataProvider`]s and to the metrics backend:
//!
//! - the poll loop (one tokio task per runner) runs every provider once per
//!   tick, in attachment order, then sleeps for the interval (fixed delay);
//! - the scrape path reads whatever snapshot was last published.
//!
//! The two sides never share a mutable value. Each tick works on a private
//! draft cloned from the last published snapshot and publishes it by swapping
//! an `Arc` once every provider has run, so a scrape always renders a complete
//! snapshot from some tick.
//!
//! Every provider runs on its own task. A provider that panics loses only its
//! own changes for that tick; the draft from before it ran is carried forward
//! to the remaining providers.

use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::CollectorState;
use crate::metrics::{MetricsBackend, Observer, RegistrationError};

/// Interval used when a runner is configured with a zero interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// A named unit of work that populates a collector state.
///
/// Providers never return errors: failures are logged by the provider and
/// the affected fields are left untouched (or cleared, where that is the
/// documented behaviour of the provider).
#[async_trait]
pub trait DataProvider<T>: Send + Sync {
    fn name(&self) -> &str;

    async fn provide(&self, ctx: &CancellationToken, state: &mut T);
}

/// Adapts a synchronous closure into a [`DataProvider`].
pub struct FnProvider<T, F> {
    name: String,
    f: F,
    _state: PhantomData<fn(&mut T)>,
}

impl<T, F> FnProvider<T, F>
where
    F: Fn(&mut T) + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _state: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> DataProvider<T> for FnProvider<T, F>
where
    T: Send + 'static,
    F: Fn(&mut T) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn provide(&self, _ctx: &CancellationToken, state: &mut T) {
        (self.f)(state)
    }
}

/// Read side of a runner's published snapshot.
pub struct SnapshotReader<T> {
    slot: Arc<RwLock<Arc<T>>>,
}

impl<T> Clone for SnapshotReader<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> SnapshotReader<T> {
    /// Returns the last published snapshot.
    pub fn snapshot(&self) -> Arc<T> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, next: T) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}

/// Periodic executor for one collector state type.
pub struct CollectorRunner<T: CollectorState> {
    name: String,
    interval: Duration,
    providers: Vec<Arc<dyn DataProvider<T>>>,
    reader: SnapshotReader<T>,
}

impl<T: CollectorState> CollectorRunner<T> {
    /// Creates a runner whose state starts out as `T::default()`.
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            providers: Vec::new(),
            reader: SnapshotReader {
                slot: Arc::new(RwLock::new(Arc::new(T::default()))),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Appends a provider. Duplicates are allowed and run once per attachment.
    pub fn attach(&mut self, provider: impl DataProvider<T> + 'static) -> &mut Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Names of the attached providers, in invocation order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn reader(&self) -> SnapshotReader<T> {
        self.reader.clone()
    }

    pub fn snapshot(&self) -> Arc<T> {
        self.reader.snapshot()
    }

    /// Registers the observation callback with `backend`.
    ///
    /// A zero interval is replaced by [`DEFAULT_INTERVAL`] here.
    pub fn initialize(&mut self, backend: &dyn MetricsBackend) -> Result<(), RegistrationError> {
        if self.interval.is_zero() {
            warn!(collector = %self.name, "interval was 0: set to {}s", DEFAULT_INTERVAL.as_secs());
            self.interval = DEFAULT_INTERVAL;
        }

        let reader = self.reader.clone();
        backend.register(
            Box::new(move |observer: &mut dyn Observer| {
                let snapshot = reader.snapshot();
                snapshot.observe(observer);
            }),
            T::metrics(),
        )
    }

    /// Spawns the poll loop. It exits after the tick in progress once `token`
    /// is cancelled.
    pub fn start(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    async fn run(self, token: CancellationToken) {
        info!(
            collector = %self.name,
            interval_secs = self.interval.as_secs(),
            providers = self.providers.len(),
            "starting collector loop"
        );

        let mut ticks: u64 = 0;
        while !token.is_cancelled() {
            let started = Instant::now();
            self.tick(&token).await;
            ticks += 1;

            let elapsed = started.elapsed();
            debug!(
                collector = %self.name,
                duration_ms = elapsed.as_millis() as u64,
                ticks,
                "tick completed"
            );
            if elapsed > self.interval {
                warn!(
                    collector = %self.name,
                    duration_ms = elapsed.as_millis() as u64,
                    interval_ms = self.interval.as_millis() as u64,
                    "tick took longer than the interval"
                );
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(collector = %self.name, ticks, "collector loop stopped");
    }

    /// Runs every attached provider once and publishes the result.
    pub async fn tick(&self, token: &CancellationToken) {
        let mut draft = T::clone(&self.reader.snapshot());

        for provider in &self.providers {
            let name = provider.name().to_string();
            let provider = provider.clone();
            let ctx = token.clone();
            let mut input = draft.clone();

            let task = tokio::spawn(async move {
                provider.provide(&ctx, &mut input).await;
                input
            });

            match task.await {
                Ok(updated) => draft = updated,
                Err(e) => error!(
                    collector = %self.name,
                    provider = %name,
                    error = %e,
                    "provider failed, keeping previous values"
                ),
            }
        }

        self.reader.publish(draft);
    }
}
