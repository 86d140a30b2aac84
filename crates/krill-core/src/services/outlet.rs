//! # Outlets
//!
//! Where a subscriber hands each decoded payload. An outlet owns a formatter
//! (used by its subscribers to decode) and a sink that does the work:
//!
//! | Type | Sink |
//! |------|------|
//! | `discard` | [`DiscardSink`] |
//! | `count` | [`CountSink`] |
//! | `log` | [`LogSink`] |
//! | `collect` | [`CollectSink`], bounded by `capacity` |
//! | `forward` | [`ForwardSink`], republishes to `topic` |

use super::codec::Payload;
use super::{withdraw, EntityService, Formatter, Scope};
use crate::error::{BuildError, OutletError};
use crate::registry::Entity;
use crate::store::Stores;
use async_trait::async_trait;
use krill_bus::{Message, Topic};
use krill_types::{EntityKind, OutletKind, OutletSpec};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_COLLECT_CAPACITY: usize = 1000;

/// One decoded message on its way into a sink.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub trace_id: Uuid,
    pub topic: Arc<str>,
    pub publisher: Arc<str>,
    pub sequence: u64,
    pub subscriber: Arc<str>,
    pub payload: Payload,
    /// Encoded size as received.
    pub bytes: usize,
}

/// Terminal handler for delivered payloads.
#[async_trait]
pub trait OutletSink: Send + Sync {
    async fn deliver(&self, delivery: Delivery, cancel: &CancellationToken) -> Result<(), OutletError>;
}

#[derive(Debug, Default)]
pub struct DiscardSink;

#[async_trait]
impl OutletSink for DiscardSink {
    async fn deliver(&self, _delivery: Delivery, _cancel: &CancellationToken) -> Result<(), OutletError> {
        Ok(())
    }
}

/// Message and byte counts, in total and per publisher.
#[derive(Debug, Default)]
pub struct CountSink {
    messages: AtomicU64,
    bytes: AtomicU64,
    by_publisher: Mutex<BTreeMap<String, u64>>,
}

impl CountSink {
    #[must_use]
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn by_publisher(&self) -> BTreeMap<String, u64> {
        self.by_publisher.lock().clone()
    }
}

#[async_trait]
impl OutletSink for CountSink {
    async fn deliver(&self, delivery: Delivery, _cancel: &CancellationToken) -> Result<(), OutletError> {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(delivery.bytes as u64, Ordering::Relaxed);
        *self
            .by_publisher
            .lock()
            .entry(delivery.publisher.to_string())
            .or_default() += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub struct LogSink {
    outlet: String,
}

impl LogSink {
    #[must_use]
    pub fn new(outlet: &str) -> Self {
        Self {
            outlet: outlet.to_string(),
        }
    }
}

#[async_trait]
impl OutletSink for LogSink {
    async fn deliver(&self, delivery: Delivery, _cancel: &CancellationToken) -> Result<(), OutletError> {
        krill_telemetry::log_event!(
            debug,
            "outlet",
            "Payload delivered",
            name = %self.outlet,
            subscriber = %delivery.subscriber,
            publisher = %delivery.publisher,
            sequence = delivery.sequence,
            trace_id = %delivery.trace_id,
            payload = %delivery.payload
        );
        Ok(())
    }
}

/// A payload kept by a [`CollectSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub trace_id: Uuid,
    pub publisher: String,
    pub subscriber: String,
    pub sequence: u64,
    pub payload: Payload,
}

/// Keeps the most recent `capacity` payloads.
#[derive(Debug)]
pub struct CollectSink {
    capacity: usize,
    items: Mutex<VecDeque<Collected>>,
}

impl CollectSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_COLLECT_CAPACITY))),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Collected payloads, oldest first.
    #[must_use]
    pub fn items(&self) -> Vec<Collected> {
        self.items.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl OutletSink for CollectSink {
    async fn deliver(&self, delivery: Delivery, _cancel: &CancellationToken) -> Result<(), OutletError> {
        let mut items = self.items.lock();
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(Collected {
            trace_id: delivery.trace_id,
            publisher: delivery.publisher.to_string(),
            subscriber: delivery.subscriber.to_string(),
            sequence: delivery.sequence,
            payload: delivery.payload,
        });
        Ok(())
    }
}

/// Re-encodes payloads and republishes them under the same trace id.
pub struct ForwardSink {
    outlet: Arc<str>,
    formatter: Arc<Formatter>,
    target: Arc<Topic>,
    sequence: AtomicU64,
}

impl ForwardSink {
    #[must_use]
    pub fn new(outlet: &str, formatter: Arc<Formatter>, target: Arc<Topic>) -> Self {
        Self {
            outlet: Arc::from(outlet),
            formatter,
            target,
            sequence: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn target(&self) -> &Arc<Topic> {
        &self.target
    }
}

#[async_trait]
impl OutletSink for ForwardSink {
    async fn deliver(&self, delivery: Delivery, cancel: &CancellationToken) -> Result<(), OutletError> {
        let payload = self
            .formatter
            .encode(&delivery.payload)
            .map_err(|e| OutletError::Forward {
                outlet: self.outlet.to_string(),
                reason: e.to_string(),
            })?;

        let message = Message {
            trace_id: delivery.trace_id,
            topic: self.target.name_arc(),
            publisher: Arc::clone(&self.outlet),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            payload,
            published_at: Instant::now(),
        };
        let report = self.target.publish(message, cancel).await;
        match report.undelivered.first() {
            None => Ok(()),
            Some((subscriber, reason)) => Err(OutletError::Forward {
                outlet: self.outlet.to_string(),
                reason: format!(
                    "{} of {} subscribers on '{}' not reached (first: '{}', {})",
                    report.undelivered.len(),
                    report.undelivered.len() + report.enqueued.len(),
                    self.target.name(),
                    subscriber,
                    reason.as_str()
                ),
            }),
        }
    }
}

pub struct Outlet {
    name: String,
    kind: OutletKind,
    formatter: Arc<Formatter>,
    sink: Arc<dyn OutletSink>,
    collector: Option<Arc<CollectSink>>,
    counter: Option<Arc<CountSink>>,
    forward: Option<Arc<ForwardSink>>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Outlet {
    #[must_use]
    pub fn kind(&self) -> OutletKind {
        self.kind
    }

    /// Formatter subscribers decode with.
    #[must_use]
    pub fn formatter(&self) -> &Arc<Formatter> {
        &self.formatter
    }

    /// The sink of a `collect` outlet.
    #[must_use]
    pub fn collector(&self) -> Option<&Arc<CollectSink>> {
        self.collector.as_ref()
    }

    /// The sink of a `count` outlet.
    #[must_use]
    pub fn counter(&self) -> Option<&Arc<CountSink>> {
        self.counter.as_ref()
    }

    /// The topic a `forward` outlet republishes to.
    #[must_use]
    pub fn forward_target(&self) -> Option<&Arc<Topic>> {
        self.forward.as_ref().map(|sink| sink.target())
    }

    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub async fn deliver(&self, delivery: Delivery, cancel: &CancellationToken) -> Result<(), OutletError> {
        let result = self.sink.deliver(delivery, cancel).await;
        match result {
            Ok(()) => self.delivered.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }
}

impl std::fmt::Debug for Outlet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outlet")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("formatter", &self.formatter)
            .finish()
    }
}

impl Entity for Outlet {
    const KIND: EntityKind = EntityKind::Outlet;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct OutletService {
    stores: Arc<Stores>,
}

impl OutletService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for OutletService {
    type Spec = OutletSpec;
    type Entity = Outlet;

    fn create(&self, spec: &OutletSpec) -> Result<Arc<Outlet>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        let formatter = scope.resolve::<Formatter>("formatter", &spec.formatter)?;

        if spec.kind != OutletKind::Forward && spec.topic.is_some() {
            return Err(scope.invalid("only forward outlets take a topic"));
        }
        if spec.kind != OutletKind::Collect && spec.capacity.is_some() {
            return Err(scope.invalid("only collect outlets take a capacity"));
        }

        let mut collector = None;
        let mut counter = None;
        let mut forward = None;
        let sink: Arc<dyn OutletSink> = match spec.kind {
            OutletKind::Discard => Arc::new(DiscardSink),
            OutletKind::Log => Arc::new(LogSink::new(&spec.name)),
            OutletKind::Count => {
                let sink = Arc::new(CountSink::default());
                counter = Some(Arc::clone(&sink));
                sink
            }
            OutletKind::Collect => {
                let capacity = spec.capacity.unwrap_or(DEFAULT_COLLECT_CAPACITY);
                if capacity == 0 {
                    return Err(scope.invalid("capacity must be at least 1"));
                }
                let sink = Arc::new(CollectSink::new(capacity));
                collector = Some(Arc::clone(&sink));
                sink
            }
            OutletKind::Forward => {
                let Some(topic) = spec.topic.as_deref() else {
                    return Err(scope.invalid("forward outlets need a topic"));
                };
                let target = scope.resolve::<Topic>("topic", topic)?;
                let sink = Arc::new(ForwardSink::new(&spec.name, Arc::clone(&formatter), target));
                forward = Some(Arc::clone(&sink));
                sink
            }
        };

        scope.admit(
            &self.stores.outlets,
            Arc::new(Outlet {
                name: spec.name.clone(),
                kind: spec.kind,
                formatter,
                sink,
                collector,
                counter,
                forward,
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        )
    }

    fn remove(&self, name: &str) {
        withdraw(&self.stores, &self.stores.outlets, name);
    }
}
