//! # Configuration Document
//!
//! The declarative description of a simulation. Each entity kind has its own
//! list of named specs; specs refer to each other by name only, and the
//! builder resolves those names into a live graph.
//!
//! ```yaml
//! log_level: info
//! ports:
//!   metrics: 2112
//! simulation:
//!   sites: [{ name: s1 }]
//!   nodes: [{ name: n1, site: s1, attributes: { model: th-100 } }]
//!   brokers: [{ name: b1 }]
//!   topics: [{ name: t1, broker: b1 }]
//!   clients: [{ name: c1, site: s1, broker: b1 }]
//!   formatters: [{ name: json, type: json }]
//!   renderers: [{ name: r1, formatter: json, node: n1, template: { temp: "${random}" } }]
//!   outlets: [{ name: discard, formatter: json, type: discard }]
//!   tracers: [{ name: tr1 }]
//!   subscribers: [{ name: sub1, client: c1, topic: t1, outlet: discard, tracer: tr1 }]
//!   publishers: [{ name: p1, client: c1, topic: t1, renderer: r1, tracer: tr1, interval: 100ms }]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::kind::EntityKind;

/// Default Prometheus scrape port.
pub const DEFAULT_METRICS_PORT: u16 = 2112;

/// Default observer sampling interval.
pub const DEFAULT_OBSERVER_INTERVAL: Duration = Duration::from_secs(5);

/// A spec that declares one named entity of a known kind.
pub trait NamedSpec {
    /// The kind of entity this spec declares.
    const KIND: EntityKind;

    /// The declared entity name.
    fn name(&self) -> &str;
}

macro_rules! named_spec {
    ($($spec:ty => $kind:ident),* $(,)?) => {
        $(
            impl NamedSpec for $spec {
                const KIND: EntityKind = EntityKind::$kind;

                fn name(&self) -> &str {
                    &self.name
                }
            }
        )*
    };
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigDocument {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Listening ports.
    #[serde(default)]
    pub ports: Ports,

    /// The simulation graph.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ConfigDocument {
    /// Parse a document from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse a document from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Structural checks that need no cross-reference resolution.
    ///
    /// Reference integrity is the builder's job; this only rejects specs
    /// that could never be valid regardless of the rest of the graph.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let errors = self.simulation.structural_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Listening ports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ports {
    /// Port serving `/metrics`.
    #[serde(default = "default_metrics_port")]
    pub metrics: u16,
}

fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            metrics: DEFAULT_METRICS_PORT,
        }
    }
}

/// One list of named specs per entity kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    #[serde(default)]
    pub sites: Vec<SiteSpec>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub brokers: Vec<BrokerSpec>,
    #[serde(default)]
    pub topics: Vec<TopicSpec>,
    #[serde(default)]
    pub clients: Vec<ClientSpec>,
    #[serde(default)]
    pub formatters: Vec<FormatterSpec>,
    #[serde(default)]
    pub renderers: Vec<RendererSpec>,
    #[serde(default)]
    pub limiters: Vec<LimiterSpec>,
    #[serde(default)]
    pub outlets: Vec<OutletSpec>,
    #[serde(default)]
    pub tracers: Vec<TracerSpec>,
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
    #[serde(default)]
    pub subscribers: Vec<SubscriberSpec>,
    #[serde(default)]
    pub publishers: Vec<PublisherSpec>,
    #[serde(default)]
    pub observers: Vec<ObserverSpec>,
}

impl SimulationConfig {
    /// Total number of declared entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.sites.len()
            + self.nodes.len()
            + self.edges.len()
            + self.brokers.len()
            + self.topics.len()
            + self.clients.len()
            + self.formatters.len()
            + self.renderers.len()
            + self.limiters.len()
            + self.outlets.len()
            + self.tracers.len()
            + self.providers.len()
            + self.subscribers.len()
            + self.publishers.len()
            + self.observers.len()
    }

    fn structural_errors(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        check_names(&self.sites, &mut errors);
        check_names(&self.nodes, &mut errors);
        check_names(&self.edges, &mut errors);
        check_names(&self.brokers, &mut errors);
        check_names(&self.topics, &mut errors);
        check_names(&self.clients, &mut errors);
        check_names(&self.formatters, &mut errors);
        check_names(&self.renderers, &mut errors);
        check_names(&self.limiters, &mut errors);
        check_names(&self.outlets, &mut errors);
        check_names(&self.tracers, &mut errors);
        check_names(&self.providers, &mut errors);
        check_names(&self.subscribers, &mut errors);
        check_names(&self.publishers, &mut errors);
        check_names(&self.observers, &mut errors);

        for publisher in &self.publishers {
            if publisher.interval.is_zero() {
                errors.push(ConfigError::invalid(
                    EntityKind::Publisher,
                    &publisher.name,
                    "interval must be greater than zero",
                ));
            }
        }

        for observer in &self.observers {
            if observer.interval.is_zero() {
                errors.push(ConfigError::invalid(
                    EntityKind::Observer,
                    &observer.name,
                    "interval must be greater than zero",
                ));
            }
        }

        for limiter in &self.limiters {
            if !(limiter.rate.is_finite() && limiter.rate > 0.0) {
                errors.push(ConfigError::invalid(
                    EntityKind::Limiter,
                    &limiter.name,
                    "rate must be a positive number",
                ));
            }
            if limiter.burst == 0 {
                errors.push(ConfigError::invalid(
                    EntityKind::Limiter,
                    &limiter.name,
                    "burst must be at least 1",
                ));
            }
        }

        errors
    }
}

fn check_names<S: NamedSpec>(specs: &[S], errors: &mut Vec<ConfigError>) {
    for spec in specs {
        if spec.name().trim().is_empty() {
            errors.push(ConfigError::EmptyName(S::KIND));
        }
    }
}

// =============================================================================
// TOPOLOGY
// =============================================================================

/// A physical or logical location containing nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SiteSpec {
    pub name: String,
}

/// A device placed at a site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    pub name: String,
    /// Owning site.
    pub site: String,
    /// Device attributes available to renderer templates as `${attr.KEY}`.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

/// Direction of traffic along an edge.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    /// Source sends towards destination.
    #[default]
    Uplink,
    /// Destination sends towards source.
    Downlink,
    /// Both ways.
    Bidirectional,
}

/// A relation between two nodes, or between a node and the outside world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EdgeSpec {
    pub name: String,
    pub source: String,
    /// `None` means the edge leaves the simulated topology.
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub direction: EdgeDirection,
}

// =============================================================================
// PUB/SUB SUBSTRATE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BrokerSpec {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TopicSpec {
    pub name: String,
    /// Owning broker.
    pub broker: String,
}

/// A simulated network endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientSpec {
    pub name: String,
    pub site: String,
    pub broker: String,
}

// =============================================================================
// PIPELINE STAGES
// =============================================================================

/// Wire encodings supported by formatters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FormatterKind {
    #[default]
    Json,
    Yaml,
    /// Flat `key=value` lines.
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FormatterSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FormatterKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RendererSpec {
    pub name: String,
    pub formatter: String,
    /// Default node context; a publisher's own node takes precedence.
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub template: BTreeMap<String, Value>,
}

/// Token bucket parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LimiterSpec {
    pub name: String,
    /// Sustained tokens per second.
    pub rate: f64,
    /// Bucket capacity.
    pub burst: u32,
}

/// What an outlet does with delivered payloads.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutletKind {
    #[default]
    Discard,
    Count,
    Log,
    /// Keep the most recent payloads in memory.
    Collect,
    /// Re-encode and republish to another topic.
    Forward,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OutletSpec {
    pub name: String,
    pub formatter: String,
    #[serde(rename = "type", default)]
    pub kind: OutletKind,
    /// Target topic for `forward` outlets.
    #[serde(default)]
    pub topic: Option<String>,
    /// Retained payloads for `collect` outlets.
    #[serde(default)]
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TracerSpec {
    pub name: String,
    /// Maximum retained trace records; oldest are evicted first.
    #[serde(default)]
    pub retention: Option<usize>,
}

// =============================================================================
// RUNTIME
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubscriberSpec {
    pub name: String,
    pub client: String,
    pub topic: String,
    pub outlet: String,
    pub tracer: String,
    /// Bounded inbound queue length; a full queue suspends publishers.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PublisherSpec {
    pub name: String,
    pub client: String,
    pub topic: String,
    pub renderer: String,
    pub tracer: String,
    #[serde(default)]
    pub limiter: Option<String>,
    /// Node context for rendering.
    #[serde(default)]
    pub node: Option<String>,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

// =============================================================================
// OBSERVABILITY
// =============================================================================

/// A metrics sink backed by the process metrics registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProviderSpec {
    pub name: String,
    /// Metric name prefix; defaults to `krill`.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Constant labels attached to every metric.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ObserverSpec {
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub tracers: Vec<String>,
    #[serde(with = "humantime_serde", default = "default_observer_interval")]
    pub interval: Duration,
}

fn default_observer_interval() -> Duration {
    DEFAULT_OBSERVER_INTERVAL
}

named_spec! {
    SiteSpec => Site,
    NodeSpec => Node,
    EdgeSpec => Edge,
    BrokerSpec => Broker,
    TopicSpec => Topic,
    ClientSpec => Client,
    FormatterSpec => Formatter,
    RendererSpec => Renderer,
    LimiterSpec => Limiter,
    OutletSpec => Outlet,
    TracerSpec => Tracer,
    ProviderSpec => Provider,
    SubscriberSpec => Subscriber,
    PublisherSpec => Publisher,
    ObserverSpec => Observer,
}
