//! # Publisher
//!
//! Emits a rendered message on a fixed interval.
//!
//! Each tick: wait for the limiter (if any), render, encode, open a trace and
//! publish. Missed ticks are delayed rather than bursted. A render or encode
//! failure becomes a failed trace and the schedule carries on.
//!
//! Cancellation is observed at the tick, inside the limiter wait, and while
//! the topic waits for queue capacity. Nothing is rendered after it fires.

use super::template::RenderContext;
use super::{
    withdraw, Client, EntityService, Lifecycle, LifecycleCell, Limiter, Node, Renderer, Scope,
    Tracer,
};
use crate::error::{BuildError, PublishError};
use crate::registry::Entity;
use crate::services::client::check_reach;
use crate::store::Stores;
use bytes::Bytes;
use krill_bus::{Message, PublishReport, Topic};
use krill_telemetry::log_event;
use krill_types::{EntityKind, PublisherSpec};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const SERVICE: &str = "publisher";

pub struct Publisher {
    name: Arc<str>,
    client: Arc<Client>,
    topic: Arc<Topic>,
    renderer: Arc<Renderer>,
    limiter: Option<Arc<Limiter>>,
    tracer: Arc<Tracer>,
    node: Option<Arc<Node>>,
    interval: Duration,
    lifecycle: LifecycleCell,
    sequence: AtomicU64,
    published: AtomicU64,
    failures: AtomicU64,
}

impl Publisher {
    #[must_use]
    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    #[must_use]
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    #[must_use]
    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    /// Messages handed to the topic.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Render or encode failures.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Publish on every tick until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if !self.lifecycle.start() {
            log_event!(warn, SERVICE, "Publisher already started", name = %self.name);
            return;
        }
        log_event!(
            info,
            SERVICE,
            "Publisher started",
            name = %self.name,
            topic = %self.topic.name(),
            interval_ms = self.interval.as_millis() as u64
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Some(limiter) = &self.limiter {
                if limiter.acquire(&cancel).await.is_err() {
                    break;
                }
            }
            if cancel.is_cancelled() {
                break;
            }
            self.emit(&cancel).await;
        }

        self.lifecycle.stop();
        log_event!(
            info,
            SERVICE,
            "Publisher stopped",
            name = %self.name,
            published = self.published(),
            failures = self.failures()
        );
    }

    /// Render, encode and publish one message.
    ///
    /// Returns the fan-out report, or `None` when the message failed before
    /// reaching the topic.
    pub async fn emit(&self, cancel: &CancellationToken) -> Option<PublishReport> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let payload = match self.encode(sequence) {
            Ok(payload) => payload,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.tracer.record_publish_failure(
                    &self.name,
                    self.topic.name(),
                    sequence,
                    Instant::now(),
                    &e.to_string(),
                );
                log_event!(warn, SERVICE, "Publish failed", name = %self.name, sequence = sequence, error = %e);
                return None;
            }
        };

        let published_at = Instant::now();
        let trace_id = self
            .tracer
            .begin_trace(&self.name, self.topic.name(), sequence, published_at);
        self.client.record_sent(payload.len());

        let message = Message {
            trace_id,
            topic: self.topic.name_arc(),
            publisher: Arc::clone(&self.name),
            sequence,
            payload,
            published_at,
        };
        let report = self.topic.publish(message, cancel).await;
        self.published.fetch_add(1, Ordering::Relaxed);

        for (subscriber, reason) in &report.undelivered {
            self.tracer
                .record_delivery_failure(trace_id, subscriber, reason.as_str());
        }
        if !report.is_complete() {
            log_event!(
                debug,
                SERVICE,
                "Message not delivered to every subscriber",
                name = %self.name,
                trace_id = %trace_id,
                undelivered = report.undelivered.len()
            );
        }
        Some(report)
    }

    fn encode(&self, sequence: u64) -> Result<Bytes, PublishError> {
        let ctx = RenderContext {
            node: self.node.as_deref(),
            publisher: &self.name,
            topic: self.topic.name(),
            sequence,
        };
        let payload = self.renderer.render(&ctx)?;
        Ok(self.renderer.formatter().encode(&payload)?)
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.name)
            .field("topic", &self.topic.name())
            .field("interval", &self.interval)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

impl Entity for Publisher {
    const KIND: EntityKind = EntityKind::Publisher;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct PublisherService {
    stores: Arc<Stores>,
}

impl PublisherService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for PublisherService {
    type Spec = PublisherSpec;
    type Entity = Publisher;

    fn create(&self, spec: &PublisherSpec) -> Result<Arc<Publisher>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        let client = scope.resolve::<Client>("client", &spec.client)?;
        let topic = scope.resolve::<Topic>("topic", &spec.topic)?;
        let renderer = scope.resolve::<Renderer>("renderer", &spec.renderer)?;
        let tracer = scope.resolve::<Tracer>("tracer", &spec.tracer)?;
        let limiter = scope.resolve_opt::<Limiter>("limiter", spec.limiter.as_deref())?;
        let node = scope.resolve_opt::<Node>("node", spec.node.as_deref())?;
        check_reach(&scope, &client, &topic)?;

        if spec.interval.is_zero() {
            return Err(scope.invalid("interval must be greater than zero"));
        }
        if node.is_none() && renderer.needs_node() {
            return Err(scope.invalid(format!(
                "renderer '{}' uses node placeholders but neither it nor the publisher names a node",
                renderer.name()
            )));
        }

        scope.admit(
            &self.stores.publishers,
            Arc::new(Publisher {
                name: Arc::from(spec.name.as_str()),
                client,
                topic,
                renderer,
                limiter,
                tracer,
                node,
                interval: spec.interval,
                lifecycle: LifecycleCell::new(),
                sequence: AtomicU64::new(0),
                published: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        )
    }

    fn remove(&self, name: &str) {
        withdraw(&self.stores, &self.stores.publishers, name);
    }
}
