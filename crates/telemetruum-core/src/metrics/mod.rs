//! Boundary to the pull-based metrics system.
//!
//! Collector states never talk to a metrics library directly. They render
//! themselves into an [`Observer`] sink, and a [`MetricsBackend`] decides what
//! to do with the observations when a scrape happens.
//!
//! ```text
//!   scrape ──► MetricsBackend ──► ObservationCallback ──► CollectorState::observe
//!                                        │                         │
//!                                        └──────── Observer ◄──────┘
//! ```

mod prometheus;

pub use prometheus::{CONTENT_TYPE, PrometheusBackend, sanitize_label_name};

use thiserror::Error;

/// Descriptor of one observable gauge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricHandle {
    pub name: &'static str,
    pub help: &'static str,
}

impl MetricHandle {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self { name, help }
    }
}

/// Attribute list of a single observation, in insertion order.
pub type Attributes = Vec<(String, String)>;

/// One attributed data point emitted at scrape time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub metric: &'static str,
    pub value: i64,
    pub attributes: Attributes,
}

impl Observation {
    /// Returns the value of the attribute `key`, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Sink that receives observations while a collector state renders itself.
pub trait Observer {
    fn observe(&mut self, metric: &MetricHandle, value: i64, attributes: Attributes);
}

/// Observer that simply records everything it is given.
#[derive(Debug, Default)]
pub struct ObservationBuffer {
    observations: Vec<Observation>,
}

impl ObservationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Observations recorded for `metric`, in emission order.
    pub fn for_metric<'a>(&'a self, metric: &'a str) -> impl Iterator<Item = &'a Observation> {
        self.observations.iter().filter(move |o| o.metric == metric)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

impl Observer for ObservationBuffer {
    fn observe(&mut self, metric: &MetricHandle, value: i64, attributes: Attributes) {
        self.observations.push(Observation {
            metric: metric.name,
            value,
            attributes,
        });
    }
}

/// Callback registered with a backend; invoked once per scrape.
pub type ObservationCallback = Box<dyn Fn(&mut dyn Observer) + Send + Sync>;

/// Error returned when a backend refuses a callback registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("no observable metrics declared")]
    NoMetrics,
    #[error("invalid metric name '{0}'")]
    InvalidName(String),
    #[error("metric '{0}' is already registered")]
    Duplicate(String),
}

/// A pull-based metrics system that can host observation callbacks.
pub trait MetricsBackend {
    /// Registers `callback` as the reporter for `metrics`.
    ///
    /// The set of metrics is fixed once registration succeeds.
    fn register(
        &self,
        callback: ObservationCallback,
        metrics: Vec<MetricHandle>,
    ) -> Result<(), RegistrationError>;
}

/// Checks a metric name against the exposition format grammar
/// `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
