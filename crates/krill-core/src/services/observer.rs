//! # Observer
//!
//! Periodically samples the running graph and exports it through a metrics
//! provider. All metrics are registered when the observer is created, before
//! the provider is sealed, and carry an `observer="<name>"` label.
//!
//! ## Exported metrics
//!
//! | Metric | Type | Source |
//! |--------|------|--------|
//! | `entities{kind}` | gauge | registry counts per kind |
//! | `publishers_running` | gauge | publisher lifecycles |
//! | `subscribers_running` | gauge | subscriber lifecycles |
//! | `traces_total` | counter | tracer summaries |
//! | `deliveries_total` | counter | tracer summaries |
//! | `delivery_failures_total` | counter | tracer summaries |
//! | `publish_failures_total` | counter | tracer summaries |
//! | `delivery_success_ratio` | gauge | delivered / (delivered + failed) |
//! | `delivery_latency_seconds` | histogram | tracer latency feeds |
//! | `client_messages{client,direction}` | gauge | client accounting |
//! | `client_bytes{client,direction}` | gauge | client accounting |

use super::{withdraw, EntityService, Lifecycle, Scope, Tracer, TraceSummary};
use crate::error::BuildError;
use crate::registry::Entity;
use crate::store::Stores;
use krill_telemetry::{
    latency_buckets, log_event, CounterHandle, GaugeHandle, GaugeVecHandle, HistogramHandle,
    MetricsProvider, ProviderError,
};
use krill_types::{EntityKind, ObserverSpec};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const SERVICE: &str = "observer";

/// One observation of the graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObserverSample {
    pub entities: BTreeMap<EntityKind, usize>,
    pub publishers_running: usize,
    pub subscribers_running: usize,
    /// Summary per observed tracer.
    pub traces: BTreeMap<String, TraceSummary>,
}

impl ObserverSample {
    /// Delivered and failed deliveries across all observed tracers.
    #[must_use]
    pub fn deliveries(&self) -> (u64, u64) {
        self.traces
            .values()
            .fold((0, 0), |(d, f), s| (d + s.delivered, f + s.failed))
    }
}

struct Metrics {
    entities: GaugeVecHandle,
    publishers_running: GaugeHandle,
    subscribers_running: GaugeHandle,
    traces: CounterHandle,
    deliveries: CounterHandle,
    delivery_failures: CounterHandle,
    publish_failures: CounterHandle,
    success_ratio: GaugeHandle,
    latency: HistogramHandle,
    client_messages: GaugeVecHandle,
    client_bytes: GaugeVecHandle,
}

impl Metrics {
    fn register(provider: &MetricsProvider, observer: &str) -> Result<Self, ProviderError> {
        let scoped = provider.scoped(&[("observer", observer)]);
        Ok(Self {
            entities: scoped.register_gauge_vec("entities", "Registered entities per kind", &["kind"])?,
            publishers_running: scoped.register_gauge("publishers_running", "Publishers in the running state")?,
            subscribers_running: scoped
                .register_gauge("subscribers_running", "Subscribers in the running state")?,
            traces: scoped.register_counter("traces_total", "Traces started")?,
            deliveries: scoped.register_counter("deliveries_total", "Successful deliveries")?,
            delivery_failures: scoped
                .register_counter("delivery_failures_total", "Failed or undelivered deliveries")?,
            publish_failures: scoped
                .register_counter("publish_failures_total", "Messages that failed before publishing")?,
            success_ratio: scoped.register_gauge(
                "delivery_success_ratio",
                "Delivered over attempted deliveries",
            )?,
            latency: scoped.register_histogram(
                "delivery_latency_seconds",
                "Publish to receive latency",
                latency_buckets(),
            )?,
            client_messages: scoped.register_gauge_vec(
                "client_messages",
                "Messages per client and direction",
                &["client", "direction"],
            )?,
            client_bytes: scoped.register_gauge_vec(
                "client_bytes",
                "Bytes per client and direction",
                &["client", "direction"],
            )?,
        })
    }
}

/// Per-tracer read position.
#[derive(Default)]
struct Cursor {
    latency: u64,
    last: TraceSummary,
}

pub struct Observer {
    name: String,
    provider: Arc<MetricsProvider>,
    tracers: Vec<Arc<Tracer>>,
    interval: Duration,
    metrics: Metrics,
    cursors: Mutex<HashMap<String, Cursor>>,
    samples: AtomicU64,
    last: Mutex<Option<ObserverSample>>,
}

impl Observer {
    #[must_use]
    pub fn provider(&self) -> &Arc<MetricsProvider> {
        &self.provider
    }

    /// Names of the tracers this observer reads.
    #[must_use]
    pub fn tracers(&self) -> Vec<String> {
        self.tracers.iter().map(|t| t.name().to_string()).collect()
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Samples taken so far.
    #[must_use]
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_sample(&self) -> Option<ObserverSample> {
        self.last.lock().clone()
    }

    /// Observe the graph once and push the result to the provider.
    pub fn sample(&self, stores: &Stores) -> ObserverSample {
        let entities = stores.registry.counts();
        for (kind, count) in &entities {
            self.metrics.entities.set(&[kind.name()], *count as f64);
        }

        let publishers_running = stores
            .publishers
            .all()
            .iter()
            .filter(|p| p.lifecycle() == Lifecycle::Running)
            .count();
        let subscribers_running = stores
            .subscribers
            .all()
            .iter()
            .filter(|s| s.lifecycle() == Lifecycle::Running)
            .count();
        self.metrics.publishers_running.set(publishers_running as f64);
        self.metrics.subscribers_running.set(subscribers_running as f64);

        let mut traces = BTreeMap::new();
        {
            let mut cursors = self.cursors.lock();
            for tracer in &self.tracers {
                let summary = tracer.summary();
                let cursor = cursors.entry(tracer.name().to_string()).or_default();

                self.metrics.traces.inc_by(delta(summary.started, cursor.last.started));
                self.metrics
                    .deliveries
                    .inc_by(delta(summary.delivered, cursor.last.delivered));
                self.metrics
                    .delivery_failures
                    .inc_by(delta(summary.failed, cursor.last.failed));
                self.metrics
                    .publish_failures
                    .inc_by(delta(summary.publish_failures, cursor.last.publish_failures));

                let (latencies, next) = tracer.latencies_since(cursor.latency);
                for latency in latencies {
                    self.metrics.latency.observe(latency.as_secs_f64());
                }
                cursor.latency = next;
                cursor.last = summary;
                traces.insert(tracer.name().to_string(), summary);
            }
        }

        for client in stores.clients.all() {
            let stats = client.stats();
            let name = client.name();
            self.metrics
                .client_messages
                .set(&[name, "sent"], stats.messages_sent as f64);
            self.metrics
                .client_messages
                .set(&[name, "received"], stats.messages_received as f64);
            self.metrics.client_bytes.set(&[name, "sent"], stats.bytes_sent as f64);
            self.metrics
                .client_bytes
                .set(&[name, "received"], stats.bytes_received as f64);
        }

        let sample = ObserverSample {
            entities,
            publishers_running,
            subscribers_running,
            traces,
        };
        let (delivered, failed) = sample.deliveries();
        if delivered + failed > 0 {
            self.metrics
                .success_ratio
                .set(delivered as f64 / (delivered + failed) as f64);
        }

        self.samples.fetch_add(1, Ordering::Relaxed);
        *self.last.lock() = Some(sample.clone());
        sample
    }

    /// Sample every interval until `cancel` fires, then once more.
    pub async fn run(self: Arc<Self>, stores: Arc<Stores>, cancel: CancellationToken) {
        log_event!(
            info,
            SERVICE,
            "Observer started",
            name = %self.name,
            provider = %self.provider.name(),
            interval_ms = self.interval.as_millis() as u64
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = self.sample(&stores);
                    let (delivered, failed) = sample.deliveries();
                    log_event!(
                        debug,
                        SERVICE,
                        "Sample taken",
                        name = %self.name,
                        publishers_running = sample.publishers_running,
                        subscribers_running = sample.subscribers_running,
                        delivered = delivered,
                        failed = failed
                    );
                }
            }
        }

        let last = self.sample(&stores);
        let (delivered, failed) = last.deliveries();
        log_event!(
            info,
            SERVICE,
            "Observer stopped",
            name = %self.name,
            samples = self.samples(),
            delivered = delivered,
            failed = failed
        );
    }
}

fn delta(now: u64, before: u64) -> f64 {
    now.saturating_sub(before) as f64
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .field("tracers", &self.tracers())
            .field("interval", &self.interval)
            .finish()
    }
}

impl Entity for Observer {
    const KIND: EntityKind = EntityKind::Observer;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct ObserverService {
    stores: Arc<Stores>,
}

impl ObserverService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for ObserverService {
    type Spec = ObserverSpec;
    type Entity = Observer;

    fn create(&self, spec: &ObserverSpec) -> Result<Arc<Observer>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        let provider = scope.resolve::<MetricsProvider>("provider", &spec.provider)?;
        let tracers = if spec.tracers.is_empty() {
            self.stores.tracers.all()
        } else {
            spec.tracers
                .iter()
                .map(|name| scope.resolve::<Tracer>("tracers", name))
                .collect::<Result<Vec<_>, _>>()?
        };
        if spec.interval.is_zero() {
            return Err(scope.invalid("interval must be greater than zero"));
        }

        let metrics = Metrics::register(&provider, &spec.name)
            .map_err(|e| scope.invalid(format!("metric registration failed: {e}")))?;

        scope.admit(
            &self.stores.observers,
            Arc::new(Observer {
                name: spec.name.clone(),
                provider,
                tracers,
                interval: spec.interval,
                metrics,
                cursors: Mutex::new(HashMap::new()),
                samples: AtomicU64::new(0),
                last: Mutex::new(None),
            }),
        )
    }

    fn remove(&self, name: &str) {
        withdraw(&self.stores, &self.stores.observers, name);
    }
}
