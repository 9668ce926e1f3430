//! telemetruum-core: collection core of the telemetruum agent.
//!
//! Provides:
//! - `collector`: per-metric-family collector states and their rendering
//! - `metrics`: observation sink, backend binding, Prometheus registry
//! - `runner`: generic interval-driven collector runner
//! - `provider`: system, Docker and Kubernetes data providers
//! - `leader`: leadership gate and lease-based election loop

pub mod collector;
pub mod leader;
pub mod metrics;
pub mod provider;
pub mod runner;

pub use collector::CollectorState;
pub use runner::{CollectorRunner, DEFAULT_INTERVAL, DataProvider, FnProvider};

/// Crate version, shared with the agent binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
