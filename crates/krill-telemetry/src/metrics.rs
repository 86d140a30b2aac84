//! Prometheus-backed metrics providers.
//!
//! A provider is a named, namespaced view onto a shared `prometheus::Registry`.
//! Metric names follow `<namespace>_<metric>` and every metric carries the
//! provider's constant labels plus `provider="<name>"`.
//!
//! ## Registration discipline
//!
//! Metrics are registered while the simulation graph is built. Once the build
//! succeeds the provider is sealed and any further registration fails with
//! [`ProviderError::Sealed`]. If the build fails, [`MetricsProvider::unregister_all`]
//! removes everything the provider added.

use parking_lot::Mutex;
use prometheus::core::Collector;
use prometheus::{
    exponential_buckets, Counter, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::TelemetryError;

/// Namespace used when a provider does not name one.
pub const DEFAULT_NAMESPACE: &str = "krill";

/// Errors from metric registration.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Registration attempted after the build completed.
    #[error("Provider '{provider}' is sealed: cannot register '{metric}'")]
    Sealed { provider: String, metric: String },

    /// Metric with the same identity already registered.
    #[error("Metric already registered: {0}")]
    Duplicate(String),

    /// Rejected by the Prometheus client (bad name, label mismatch).
    #[error("Prometheus error: {0}")]
    Prometheus(String),
}

/// Latency buckets in seconds: 100µs doubling up to ~3.3s.
#[must_use]
pub fn latency_buckets() -> Vec<f64> {
    exponential_buckets(0.0001, 2.0, 16).unwrap_or_else(|_| vec![0.001, 0.01, 0.1, 1.0])
}

/// A named metrics sink.
pub struct MetricsProvider {
    name: String,
    namespace: String,
    const_labels: HashMap<String, String>,
    registry: Registry,
    registered: Mutex<Vec<Box<dyn Collector>>>,
    sealed: AtomicBool,
}

impl MetricsProvider {
    /// Create a provider over a shared registry.
    pub fn new(
        name: &str,
        registry: Registry,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Self {
        let mut const_labels: HashMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        const_labels.insert("provider".to_string(), name.to_string());

        Self {
            name: name.to_string(),
            namespace: namespace.unwrap_or(DEFAULT_NAMESPACE).to_string(),
            const_labels,
            registry,
            registered: Mutex::new(Vec::new()),
            sealed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The backing registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register metrics that carry extra constant labels, e.g. an observer name.
    #[must_use]
    pub fn scoped(&self, labels: &[(&str, &str)]) -> ScopedProvider<'_> {
        ScopedProvider {
            provider: self,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn register_counter(&self, name: &str, help: &str) -> Result<CounterHandle, ProviderError> {
        self.scoped(&[]).register_counter(name, help)
    }

    pub fn register_gauge(&self, name: &str, help: &str) -> Result<GaugeHandle, ProviderError> {
        self.scoped(&[]).register_gauge(name, help)
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        buckets: Vec<f64>,
    ) -> Result<HistogramHandle, ProviderError> {
        self.scoped(&[]).register_histogram(name, help, buckets)
    }

    pub fn register_gauge_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<GaugeVecHandle, ProviderError> {
        self.scoped(&[]).register_gauge_vec(name, help, label_names)
    }

    /// Refuse further registrations.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
        tracing::debug!(service = "provider", name = %self.name, "Metrics sealed");
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Number of metrics this provider registered.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.registered.lock().len()
    }

    /// Remove every metric this provider registered.
    pub fn unregister_all(&self) {
        let collectors = std::mem::take(&mut *self.registered.lock());
        for collector in collectors {
            if let Err(e) = self.registry.unregister(collector) {
                tracing::warn!(service = "provider", name = %self.name, error = %e, "Unregister failed");
            }
        }
    }

    /// Render the backing registry in text exposition format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        encode_metrics(&self.registry)
    }

    fn opts(&self, name: &str, help: &str, extra: &[(String, String)]) -> Opts {
        let mut labels = self.const_labels.clone();
        for (k, v) in extra {
            labels.insert(k.clone(), v.clone());
        }
        Opts::new(name, help)
            .namespace(self.namespace.clone())
            .const_labels(labels)
    }

    fn admit<C>(&self, name: &str, collector: C) -> Result<C, ProviderError>
    where
        C: Collector + Clone + 'static,
    {
        if self.is_sealed() {
            return Err(ProviderError::Sealed {
                provider: self.name.clone(),
                metric: name.to_string(),
            });
        }

        match self.registry.register(Box::new(collector.clone())) {
            Ok(()) => {}
            Err(prometheus::Error::AlreadyReg) => {
                return Err(ProviderError::Duplicate(format!("{}_{}", self.namespace, name)))
            }
            Err(e) => return Err(ProviderError::Prometheus(e.to_string())),
        }

        self.registered.lock().push(Box::new(collector.clone()));
        Ok(collector)
    }
}

impl std::fmt::Debug for MetricsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsProvider")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

/// A provider view that adds constant labels to everything it registers.
pub struct ScopedProvider<'a> {
    provider: &'a MetricsProvider,
    labels: Vec<(String, String)>,
}

impl ScopedProvider<'_> {
    pub fn register_counter(&self, name: &str, help: &str) -> Result<CounterHandle, ProviderError> {
        let counter = Counter::with_opts(self.provider.opts(name, help, &self.labels))
            .map_err(|e| ProviderError::Prometheus(e.to_string()))?;
        self.provider.admit(name, counter).map(CounterHandle)
    }

    pub fn register_gauge(&self, name: &str, help: &str) -> Result<GaugeHandle, ProviderError> {
        let gauge = Gauge::with_opts(self.provider.opts(name, help, &self.labels))
            .map_err(|e| ProviderError::Prometheus(e.to_string()))?;
        self.provider.admit(name, gauge).map(GaugeHandle)
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        buckets: Vec<f64>,
    ) -> Result<HistogramHandle, ProviderError> {
        let opts = HistogramOpts::from(self.provider.opts(name, help, &self.labels)).buckets(buckets);
        let histogram =
            Histogram::with_opts(opts).map_err(|e| ProviderError::Prometheus(e.to_string()))?;
        self.provider.admit(name, histogram).map(HistogramHandle)
    }

    pub fn register_gauge_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<GaugeVecHandle, ProviderError> {
        let vec = GaugeVec::new(self.provider.opts(name, help, &self.labels), label_names)
            .map_err(|e| ProviderError::Prometheus(e.to_string()))?;
        self.provider.admit(name, vec).map(GaugeVecHandle)
    }
}

/// Monotonic counter.
#[derive(Clone)]
pub struct CounterHandle(Counter);

impl CounterHandle {
    pub fn inc(&self) {
        self.0.inc();
    }

    /// Add a non-negative amount.
    pub fn inc_by(&self, v: f64) {
        if v > 0.0 {
            self.0.inc_by(v);
        }
    }

    #[must_use]
    pub fn get(&self) -> f64 {
        self.0.get()
    }
}

#[derive(Clone)]
pub struct GaugeHandle(Gauge);

impl GaugeHandle {
    pub fn set(&self, v: f64) {
        self.0.set(v);
    }

    pub fn inc(&self) {
        self.0.inc();
    }

    pub fn dec(&self) {
        self.0.dec();
    }

    #[must_use]
    pub fn get(&self) -> f64 {
        self.0.get()
    }
}

#[derive(Clone)]
pub struct HistogramHandle(Histogram);

impl HistogramHandle {
    pub fn observe(&self, v: f64) {
        self.0.observe(v);
    }

    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.0.get_sample_count()
    }

    #[must_use]
    pub fn sample_sum(&self) -> f64 {
        self.0.get_sample_sum()
    }
}

/// Gauge family keyed by label values.
#[derive(Clone)]
pub struct GaugeVecHandle(GaugeVec);

impl GaugeVecHandle {
    /// Set the gauge for `label_values`; mismatched arity is ignored.
    pub fn set(&self, label_values: &[&str], v: f64) {
        if let Ok(gauge) = self.0.get_metric_with_label_values(label_values) {
            gauge.set(v);
        }
    }

    #[must_use]
    pub fn get(&self, label_values: &[&str]) -> Option<f64> {
        self.0
            .get_metric_with_label_values(label_values)
            .ok()
            .map(|g| g.get())
    }
}

/// Encode all metrics in a registry as Prometheus text format.
pub fn encode_metrics(registry: &Registry) -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, registry: &Registry) -> MetricsProvider {
        let mut labels = BTreeMap::new();
        labels.insert("fleet".to_string(), "test".to_string());
        MetricsProvider::new(name, registry.clone(), None, &labels)
    }

    #[test]
    fn test_counter_increment() {
        let registry = Registry::new();
        let p = provider("prom", &registry);
        let counter = p.register_counter("messages_total", "Messages").unwrap();
        counter.inc();
        counter.inc_by(2.0);
        counter.inc_by(-5.0);
        assert_eq!(counter.get(), 3.0);
    }

    #[test]
    fn test_gauge_and_histogram() {
        let registry = Registry::new();
        let p = provider("prom", &registry);
        let gauge = p.register_gauge("publishers_running", "Running").unwrap();
        gauge.set(4.0);
        gauge.dec();
        assert_eq!(gauge.get(), 3.0);

        let hist = p
            .register_histogram("latency_seconds", "Latency", latency_buckets())
            .unwrap();
        hist.observe(0.01);
        hist.observe(0.02);
        assert_eq!(hist.sample_count(), 2);
    }

    #[test]
    fn test_gauge_vec_labels() {
        let registry = Registry::new();
        let p = provider("prom", &registry);
        let entities = p.register_gauge_vec("entities", "Entities", &["kind"]).unwrap();
        entities.set(&["topic"], 2.0);
        entities.set(&["topic", "extra"], 9.0);
        assert_eq!(entities.get(&["topic"]), Some(2.0));
    }

    #[test]
    fn test_sealed_rejects_registration() {
        let registry = Registry::new();
        let p = provider("prom", &registry);
        p.seal();
        assert!(matches!(
            p.register_counter("late_total", "Late"),
            Err(ProviderError::Sealed { .. })
        ));
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = Registry::new();
        let p = provider("prom", &registry);
        p.register_gauge("dup", "Dup").unwrap();
        assert!(matches!(
            p.register_gauge("dup", "Dup"),
            Err(ProviderError::Duplicate(_))
        ));
    }

    #[test]
    fn test_scoped_labels_allow_same_name() {
        let registry = Registry::new();
        let p = provider("prom", &registry);
        p.scoped(&[("observer", "a")]).register_gauge("ratio", "Ratio").unwrap();
        p.scoped(&[("observer", "b")]).register_gauge("ratio", "Ratio").unwrap();
        assert_eq!(p.registered_count(), 2);
    }

    #[test]
    fn test_unregister_all() {
        let registry = Registry::new();
        let p = provider("prom", &registry);
        p.register_counter("a_total", "A").unwrap();
        p.register_gauge("b", "B").unwrap();
        p.unregister_all();
        assert_eq!(p.registered_count(), 0);
        assert!(registry.gather().is_empty());

        // Names are free again.
        p.register_counter("a_total", "A").unwrap();
    }

    #[test]
    fn test_encode_metrics() {
        let registry = Registry::new();
        let p = provider("prom", &registry);
        let counter = p.register_counter("traces_total", "Traces").unwrap();
        counter.inc();

        let text = p.encode().unwrap();
        assert!(text.contains("krill_traces_total"));
        assert!(text.contains("provider=\"prom\""));
        assert!(text.contains("fleet=\"test\""));
    }
}
