//! Metrics backend over a `prometheus-client` registry.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric, text};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::registry::Registry;
use tracing::debug;

use super::{
    Attributes, MetricHandle, MetricsBackend, Observation, ObservationBuffer, ObservationCallback,
    RegistrationError, is_valid_metric_name,
};

/// Content type of the text exposition produced by [`PrometheusBackend::encode`].
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Default)]
struct Inner {
    registry: Registry,
    names: HashSet<&'static str>,
}

/// Backend that exposes every registered callback through one registry.
///
/// Each scrape (`encode`) invokes all callbacks synchronously, so the response
/// is only produced once every collector has rendered its current snapshot.
#[derive(Default)]
pub struct PrometheusBackend {
    inner: Mutex<Inner>,
}

impl PrometheusBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders all registered metrics in the text exposition format.
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();
        text::encode(&mut out, &inner.registry)?;
        Ok(out)
    }
}

impl MetricsBackend for PrometheusBackend {
    fn register(
        &self,
        callback: ObservationCallback,
        metrics: Vec<MetricHandle>,
    ) -> Result<(), RegistrationError> {
        if metrics.is_empty() {
            return Err(RegistrationError::NoMetrics);
        }

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let mut seen = HashSet::new();
        for metric in &metrics {
            if !is_valid_metric_name(metric.name) {
                return Err(RegistrationError::InvalidName(metric.name.to_string()));
            }
            if inner.names.contains(metric.name) || !seen.insert(metric.name) {
                return Err(RegistrationError::Duplicate(metric.name.to_string()));
            }
        }

        inner.names.extend(seen);
        debug!(
            metrics = ?metrics.iter().map(|m| m.name).collect::<Vec<_>>(),
            "registered observation callback"
        );
        inner
            .registry
            .register_collector(Box::new(CallbackCollector { callback, metrics }));
        Ok(())
    }
}

struct CallbackCollector {
    callback: ObservationCallback,
    metrics: Vec<MetricHandle>,
}

impl fmt::Debug for CallbackCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackCollector")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Collector for CallbackCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        let mut buffer = ObservationBuffer::new();
        (self.callback)(&mut buffer);

        for metric in &self.metrics {
            let mut metric_encoder =
                encoder.encode_descriptor(metric.name, metric.help, None, MetricType::Gauge)?;
            for (labels, value) in samples(buffer.for_metric(metric.name)) {
                ConstGauge::new(value).encode(metric_encoder.encode_family(&labels)?)?;
            }
        }
        Ok(())
    }
}

/// One sample per distinct label set. A repeated set keeps the position of
/// its first occurrence and the value of its last.
fn samples<'a>(observations: impl Iterator<Item = &'a Observation>) -> Vec<(Vec<(String, String)>, i64)> {
    let mut samples: Vec<(Vec<(String, String)>, i64)> = Vec::new();
    let mut seen: HashMap<Vec<(String, String)>, usize> = HashMap::new();
    for observation in observations {
        let labels = label_set(&observation.attributes);
        let mut key = labels.clone();
        key.sort();
        match seen.entry(key) {
            Entry::Occupied(slot) => samples[*slot.get()].1 = observation.value,
            Entry::Vacant(slot) => {
                slot.insert(samples.len());
                samples.push((labels, observation.value));
            }
        }
    }
    samples
}

/// Converts attributes into a label set with legal, unique label names.
/// A later attribute replaces an earlier one that maps to the same name.
fn label_set(attributes: &Attributes) -> Vec<(String, String)> {
    let mut labels: Vec<(String, String)> = Vec::with_capacity(attributes.len());
    for (key, value) in attributes {
        let name = sanitize_label_name(key);
        match labels.iter_mut().find(|(k, _)| *k == name) {
            Some(existing) => existing.1 = value.clone(),
            None => labels.push((name, value.clone())),
        }
    }
    labels
}

/// Maps an attribute key to a label name matching `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn sanitize_label_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Observer;

    const INFO: MetricHandle = MetricHandle::new("tlum_test_info", "test info");

    fn constant_callback(value: i64) -> ObservationCallback {
        Box::new(move |o: &mut dyn Observer| {
            o.observe(
                &INFO,
                value,
                vec![
                    ("agent-id".to_string(), "a1".to_string()),
                    ("icos.app.role".to_string(), "edge".to_string()),
                ],
            );
        })
    }

    #[test]
    fn test_encode_renders_registered_callback() {
        let backend = PrometheusBackend::new();
        backend.register(constant_callback(1), vec![INFO]).unwrap();

        let text = backend.encode().unwrap();
        assert!(text.contains("# TYPE tlum_test_info gauge"));
        assert!(text.contains("# HELP tlum_test_info test info"));
        assert!(text.contains("agent_id=\"a1\""));
        assert!(text.contains("icos_app_role=\"edge\""));
        assert!(text.contains("} 1"));
    }

    #[test]
    fn test_equal_label_sets_merge_last_value_wins() {
        let backend = PrometheusBackend::new();
        backend
            .register(
                Box::new(|o: &mut dyn Observer| {
                    let web = |host: &str| {
                        vec![
                            ("name".to_string(), "web-0".to_string()),
                            ("host_id".to_string(), host.to_string()),
                        ]
                    };
                    o.observe(&INFO, 1, web("h"));
                    o.observe(&INFO, 1, web("other"));
                    o.observe(&INFO, 2, web("h"));
                    // same set, different attribute order
                    o.observe(
                        &INFO,
                        3,
                        vec![
                            ("host_id".to_string(), "other".to_string()),
                            ("name".to_string(), "web-0".to_string()),
                        ],
                    );
                }),
                vec![INFO],
            )
            .unwrap();

        let text = backend.encode().unwrap();
        let samples: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("tlum_test_info{"))
            .collect();
        assert_eq!(
            samples,
            vec![
                r#"tlum_test_info{name="web-0",host_id="h"} 2"#,
                r#"tlum_test_info{name="web-0",host_id="other"} 3"#,
            ]
        );
    }

    #[test]
    fn test_callback_runs_on_every_scrape() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let backend = PrometheusBackend::new();
        backend
            .register(
                Box::new(move |_: &mut dyn Observer| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                vec![INFO],
            )
            .unwrap();

        backend.encode().unwrap();
        backend.encode().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let backend = PrometheusBackend::new();
        backend.register(constant_callback(1), vec![INFO]).unwrap();

        let err = backend.register(constant_callback(0), vec![INFO]).unwrap_err();
        assert_eq!(err, RegistrationError::Duplicate("tlum_test_info".into()));

        let err = backend
            .register(
                constant_callback(0),
                vec![
                    MetricHandle::new("twice", ""),
                    MetricHandle::new("twice", ""),
                ],
            )
            .unwrap_err();
        assert_eq!(err, RegistrationError::Duplicate("twice".into()));
    }

    #[test]
    fn test_register_rejects_invalid_input() {
        let backend = PrometheusBackend::new();
        assert_eq!(
            backend.register(constant_callback(1), Vec::new()),
            Err(RegistrationError::NoMetrics)
        );
        assert_eq!(
            backend.register(constant_callback(1), vec![MetricHandle::new("bad-name", "")]),
            Err(RegistrationError::InvalidName("bad-name".into()))
        );
    }

    #[test]
    fn test_sanitize_label_name() {
        assert_eq!(sanitize_label_name("cluster_id"), "cluster_id");
        assert_eq!(sanitize_label_name("agent-name"), "agent_name");
        assert_eq!(sanitize_label_name("icos.x.y"), "icos_x_y");
        assert_eq!(sanitize_label_name("9lives"), "_9lives");
        assert_eq!(sanitize_label_name(""), "_");
    }

    #[test]
    fn test_label_set_last_write_wins() {
        let attrs = vec![
            ("a-b".to_string(), "first".to_string()),
            ("a_b".to_string(), "second".to_string()),
        ];
        assert_eq!(
            label_set(&attrs),
            vec![("a_b".to_string(), "second".to_string())]
        );
    }
}
