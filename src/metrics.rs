//! Metrics sink
//!
//! Handlers and middleware never talk to a metrics backend directly; they
//! emit through [`MetricsSink`], which is injected into the application
//! state. Production wires [`PrometheusSink`] (rendered at `GET /metrics`),
//! tests wire [`InMemorySink`] and assert on recorded counters.

use std::collections::BTreeMap;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::Mutex;
use telemetry_metrics::{Key, Label, Level, Metadata, Recorder};

/// Metric label pairs (`name`, `value`)
pub type Labels<'a> = &'a [(&'static str, String)];

/// Counter/histogram interface used throughout the service
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by one
    fn incr_counter(&self, name: &'static str, labels: Labels<'_>);

    /// Record one histogram observation
    fn observe_histogram(&self, name: &'static str, labels: Labels<'_>, value: f64);

    /// Render the current state in Prometheus text exposition format
    fn render(&self) -> String;
}

static METADATA: Metadata<'static> = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

fn metric_key(name: &'static str, labels: Labels<'_>) -> Key {
    let labels: Vec<Label> = labels
        .iter()
        .map(|(k, v)| Label::new(*k, v.clone()))
        .collect();
    Key::from_parts(name, labels)
}

/// Prometheus-backed sink
///
/// Owns its recorder instead of installing a global one, so several sinks
/// can coexist in one process.
pub struct PrometheusSink {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl PrometheusSink {
    /// Build a sink with the default exporter settings
    #[must_use]
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self { recorder, handle }
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for PrometheusSink {
    fn incr_counter(&self, name: &'static str, labels: Labels<'_>) {
        self.recorder
            .register_counter(&metric_key(name, labels), &METADATA)
            .increment(1);
    }

    fn observe_histogram(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        self.recorder
            .register_histogram(&metric_key(name, labels), &METADATA)
            .record(value);
    }

    fn render(&self) -> String {
        self.handle.run_upkeep();
        self.handle.render()
    }
}

/// In-process sink that keeps plain counters and observation counts
#[derive(Default)]
pub struct InMemorySink {
    counters: Mutex<BTreeMap<String, u64>>,
    histograms: Mutex<BTreeMap<String, Vec<f64>>>,
}

impl InMemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter; labels must be given in emission order
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = series_name(name, labels.iter().map(|(k, v)| (*k, *v)));
        self.counters.lock().get(&key).copied().unwrap_or(0)
    }

    /// Sum of a counter across every label combination
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|(series, _)| {
                series.as_str() == name || series.starts_with(&format!("{name}{{"))
            })
            .map(|(_, v)| *v)
            .sum()
    }

    /// Number of observations recorded for a histogram, across all labels
    pub fn observations(&self, name: &str) -> usize {
        self.histograms
            .lock()
            .iter()
            .filter(|(series, _)| {
                series.as_str() == name || series.starts_with(&format!("{name}{{"))
            })
            .map(|(_, v)| v.len())
            .sum()
    }
}

fn series_name<'a>(name: &str, labels: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let rendered: Vec<String> = labels.map(|(k, v)| format!("{k}=\"{v}\"")).collect();
    if rendered.is_empty() {
        name.to_string()
    } else {
        format!("{name}{{{}}}", rendered.join(","))
    }
}

impl MetricsSink for InMemorySink {
    fn incr_counter(&self, name: &'static str, labels: Labels<'_>) {
        let key = series_name(name, labels.iter().map(|(k, v)| (*k, v.as_str())));
        *self.counters.lock().entry(key).or_insert(0) += 1;
    }

    fn observe_histogram(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        let key = series_name(name, labels.iter().map(|(k, v)| (*k, v.as_str())));
        self.histograms.lock().entry(key).or_default().push(value);
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (series, value) in self.counters.lock().iter() {
            out.push_str(&format!("{series} {value}\n"));
        }
        out
    }
}
