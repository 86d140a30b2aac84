//! # Tracer
//!
//! Correlates every published message with its deliveries. A record is opened
//! when a publisher hands a message to its topic and collects one outcome per
//! subscriber in the publish snapshot.
//!
//! ## Retention
//!
//! At most `retention` records are kept; the oldest are evicted first. Totals
//! in [`TraceSummary`] are cumulative and survive eviction.
//!
//! ## Latency feed
//!
//! Delivered latencies are appended to a log that observers read with
//! [`Tracer::latencies_since`]. Each reader keeps its own cursor.

use super::{withdraw, EntityService, Scope};
use crate::error::BuildError;
use crate::registry::Entity;
use crate::store::Stores;
use krill_types::{EntityKind, TracerSpec};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub const DEFAULT_RETENTION: usize = 10_000;

pub type TraceId = Uuid;

/// Outcome of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { latency: Duration },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub id: TraceId,
    pub publisher: String,
    pub topic: String,
    pub sequence: u64,
    pub published_at: Instant,
    /// Set when the message never left the publisher.
    pub publish_failure: Option<String>,
    /// Outcome per subscriber.
    pub deliveries: BTreeMap<String, DeliveryOutcome>,
}

impl TraceRecord {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.publish_failure.is_some()
            || self
                .deliveries
                .values()
                .any(|o| matches!(o, DeliveryOutcome::Failed { .. }))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceSummary {
    /// Traces opened, including publish failures.
    pub started: u64,
    pub delivered: u64,
    pub failed: u64,
    pub publish_failures: u64,
    pub evicted: u64,
    pub mean_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<TraceId, TraceRecord>,
    order: VecDeque<TraceId>,
    started: u64,
    delivered: u64,
    failed: u64,
    publish_failures: u64,
    evicted: u64,
    latency_total_nanos: u128,
    latency_samples: u64,
    latency_max: Option<Duration>,
    /// Latencies not yet trimmed; `latency_base` is the cursor of the first.
    latencies: VecDeque<Duration>,
    latency_base: u64,
}

#[derive(Debug)]
pub struct Tracer {
    name: String,
    retention: usize,
    state: Mutex<State>,
}

impl Tracer {
    #[must_use]
    pub fn new(name: &str, retention: usize) -> Self {
        Self {
            name: name.to_string(),
            retention: retention.max(1),
            state: Mutex::new(State::default()),
        }
    }

    #[must_use]
    pub fn retention(&self) -> usize {
        self.retention
    }

    fn insert(&self, state: &mut State, record: TraceRecord) {
        state.order.push_back(record.id);
        state.records.insert(record.id, record);
        while state.order.len() > self.retention {
            if let Some(old) = state.order.pop_front() {
                state.records.remove(&old);
                state.evicted += 1;
            }
        }
    }

    /// Open a record for a message about to be published.
    pub fn begin_trace(&self, publisher: &str, topic: &str, sequence: u64, at: Instant) -> TraceId {
        let id = Uuid::new_v4();
        let mut state = self.state.lock();
        state.started += 1;
        self.insert(
            &mut state,
            TraceRecord {
                id,
                publisher: publisher.to_string(),
                topic: topic.to_string(),
                sequence,
                published_at: at,
                publish_failure: None,
                deliveries: BTreeMap::new(),
            },
        );
        id
    }

    /// Record a message that failed before it was published.
    pub fn record_publish_failure(
        &self,
        publisher: &str,
        topic: &str,
        sequence: u64,
        at: Instant,
        reason: &str,
    ) -> TraceId {
        let id = Uuid::new_v4();
        let mut state = self.state.lock();
        state.started += 1;
        state.publish_failures += 1;
        self.insert(
            &mut state,
            TraceRecord {
                id,
                publisher: publisher.to_string(),
                topic: topic.to_string(),
                sequence,
                published_at: at,
                publish_failure: Some(reason.to_string()),
                deliveries: BTreeMap::new(),
            },
        );
        id
    }

    /// Mark `subscriber` as having received the message. Returns the latency,
    /// or `None` if the record was already evicted.
    pub fn record_delivery(&self, id: TraceId, subscriber: &str, at: Instant) -> Option<Duration> {
        let mut state = self.state.lock();
        let record = state.records.get_mut(&id)?;
        let latency = at.saturating_duration_since(record.published_at);
        let previous = record
            .deliveries
            .insert(subscriber.to_string(), DeliveryOutcome::Delivered { latency });
        if previous.is_some() {
            return Some(latency);
        }

        state.delivered += 1;
        state.latency_total_nanos += latency.as_nanos();
        state.latency_samples += 1;
        state.latency_max = Some(state.latency_max.map_or(latency, |m| m.max(latency)));
        state.latencies.push_back(latency);
        while state.latencies.len() > self.retention {
            state.latencies.pop_front();
            state.latency_base += 1;
        }
        Some(latency)
    }

    /// Mark a delivery as failed. Overrides an earlier success for the same
    /// subscriber. Counted even when the record was already evicted.
    pub fn record_delivery_failure(&self, id: TraceId, subscriber: &str, reason: &str) {
        let mut state = self.state.lock();
        state.failed += 1;
        let Some(record) = state.records.get_mut(&id) else {
            return;
        };
        let previous = record.deliveries.insert(
            subscriber.to_string(),
            DeliveryOutcome::Failed {
                reason: reason.to_string(),
            },
        );
        match previous {
            Some(DeliveryOutcome::Delivered { .. }) => {
                state.delivered = state.delivered.saturating_sub(1);
            }
            Some(DeliveryOutcome::Failed { .. }) => {
                state.failed -= 1;
            }
            None => {}
        }
    }

    #[must_use]
    pub fn summary(&self) -> TraceSummary {
        let state = self.state.lock();
        let mean_latency = mean_latency(state.latency_total_nanos, state.latency_samples);
        TraceSummary {
            started: state.started,
            delivered: state.delivered,
            failed: state.failed,
            publish_failures: state.publish_failures,
            evicted: state.evicted,
            mean_latency,
            max_latency: state.latency_max,
        }
    }

    #[must_use]
    pub fn record(&self, id: TraceId) -> Option<TraceRecord> {
        self.state.lock().records.get(&id).cloned()
    }

    /// Retained records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<TraceRecord> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect()
    }

    /// Latencies recorded since `cursor`, plus the cursor to pass next time.
    /// Samples trimmed before a slow reader caught up are skipped.
    #[must_use]
    pub fn latencies_since(&self, cursor: u64) -> (Vec<Duration>, u64) {
        let state = self.state.lock();
        let end = state.latency_base + state.latencies.len() as u64;
        let start = cursor.max(state.latency_base);
        let skip = usize::try_from(start - state.latency_base).unwrap_or(usize::MAX);
        let fresh = state.latencies.iter().skip(skip).copied().collect();
        (fresh, end)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Entity for Tracer {
    const KIND: EntityKind = EntityKind::Tracer;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct TracerService {
    stores: Arc<Stores>,
}

impl TracerService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for TracerService {
    type Spec = TracerSpec;
    type Entity = Tracer;

    fn create(&self, spec: &TracerSpec) -> Result<Arc<Tracer>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        let retention = spec.retention.unwrap_or(DEFAULT_RETENTION);
        if retention == 0 {
            return Err(scope.invalid("retention must be at least 1"));
        }
        scope.admit(&self.stores.tracers, Arc::new(Tracer::new(&spec.name, retention)))
    }

    fn remove(&self, name: &str) {
        withdraw(&self.stores, &self.stores.tracers, name);
    }
}

fn mean_latency(total_nanos: u128, samples: u64) -> Option<Duration> {
    let mean = total_nanos.checked_div(u128::from(samples))?;
    Some(Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX)))
}
