//! # Subscriber
//!
//! Consumes one topic through a client and hands every message to an outlet.
//!
//! The subscription is taken at build time, so a topic's subscriber set is
//! complete before any publisher runs. While running, each queued message is
//! recorded as delivered on the tracer, decoded with the outlet's formatter
//! and passed to the outlet. Decode and outlet failures are recorded against
//! the delivery and never end the task.
//!
//! On cancellation the subscriber detaches, closes its queue and delivers
//! whatever was already queued before stopping.

use super::outlet::Delivery;
use super::{withdraw, Client, EntityService, Lifecycle, LifecycleCell, Outlet, Scope, Tracer};
use crate::error::{BuildError, DeliveryError};
use crate::registry::Entity;
use crate::services::client::check_reach;
use crate::store::Stores;
use krill_bus::{Message, Subscription, Topic, DEFAULT_QUEUE_CAPACITY};
use krill_telemetry::log_event;
use krill_types::{EntityKind, SubscriberSpec};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SERVICE: &str = "subscriber";

pub struct Subscriber {
    name: Arc<str>,
    client: Arc<Client>,
    topic: Arc<Topic>,
    outlet: Arc<Outlet>,
    tracer: Arc<Tracer>,
    queue_capacity: usize,
    subscription: Mutex<Option<Subscription>>,
    lifecycle: LifecycleCell,
    received: AtomicU64,
    failures: AtomicU64,
}

impl Subscriber {
    #[must_use]
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    #[must_use]
    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    #[must_use]
    pub fn outlet(&self) -> &Arc<Outlet> {
        &self.outlet
    }

    #[must_use]
    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    /// Messages taken off the queue.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Messages that failed to decode or deliver.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Consume until `cancel` fires, then drain and stop.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if !self.lifecycle.start() {
            log_event!(warn, SERVICE, "Subscriber already started", name = %self.name);
            return;
        }
        let taken = self.subscription.lock().take();
        let Some(mut subscription) = taken else {
            log_event!(warn, SERVICE, "Subscriber has no subscription", name = %self.name);
            self.lifecycle.stop();
            return;
        };

        log_event!(
            info,
            SERVICE,
            "Subscriber started",
            name = %self.name,
            topic = %self.topic.name(),
            outlet = %self.outlet.name()
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = subscription.recv() => match next {
                    Some(message) => self.handle(message, &cancel).await,
                    None => break,
                },
            }
        }

        subscription.detach();
        let mut drained = 0u64;
        while let Some(message) = subscription.try_recv() {
            self.handle(message, &cancel).await;
            drained += 1;
        }
        self.lifecycle.stop();

        log_event!(
            info,
            SERVICE,
            "Subscriber stopped",
            name = %self.name,
            received = self.received(),
            failures = self.failures(),
            drained = drained
        );
    }

    async fn handle(&self, message: Message, cancel: &CancellationToken) {
        let trace_id = message.trace_id;
        self.received.fetch_add(1, Ordering::Relaxed);
        self.client.record_received(message.len());
        self.tracer.record_delivery(trace_id, &self.name, Instant::now());

        if let Err(e) = self.deliver(message, cancel).await {
            self.failures.fetch_add(1, Ordering::Relaxed);
            self.tracer
                .record_delivery_failure(trace_id, &self.name, &e.to_string());
            log_event!(
                warn,
                SERVICE,
                "Delivery failed",
                name = %self.name,
                trace_id = %trace_id,
                error = %e
            );
        }
    }

    async fn deliver(&self, message: Message, cancel: &CancellationToken) -> Result<(), DeliveryError> {
        let payload = self.outlet.formatter().decode(&message.payload)?;
        let delivery = Delivery {
            trace_id: message.trace_id,
            topic: message.topic,
            publisher: message.publisher,
            sequence: message.sequence,
            subscriber: Arc::clone(&self.name),
            payload,
            bytes: message.payload.len(),
        };
        self.outlet.deliver(delivery, cancel).await?;
        Ok(())
    }

    /// Leave the topic without running. Used when the build is rolled back.
    fn detach(&self) {
        if let Some(mut subscription) = self.subscription.lock().take() {
            subscription.detach();
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("name", &self.name)
            .field("topic", &self.topic.name())
            .field("outlet", &self.outlet.name())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

impl Entity for Subscriber {
    const KIND: EntityKind = EntityKind::Subscriber;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct SubscriberService {
    stores: Arc<Stores>,
}

impl SubscriberService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

/// Whether messages published to `from` reach `to` through the forward
/// outlets of existing subscribers, `from` itself included.
fn forwards_into(stores: &Stores, from: &str, to: &str) -> bool {
    let subscribers = stores.subscribers.all();
    let mut seen = HashSet::new();
    let mut pending = vec![from.to_string()];
    while let Some(topic) = pending.pop() {
        if topic == to {
            return true;
        }
        if !seen.insert(topic.clone()) {
            continue;
        }
        pending.extend(
            subscribers
                .iter()
                .filter(|s| s.topic.name() == topic)
                .filter_map(|s| s.outlet.forward_target())
                .map(|target| target.name().to_string()),
        );
    }
    false
}

impl EntityService for SubscriberService {
    type Spec = SubscriberSpec;
    type Entity = Subscriber;

    fn create(&self, spec: &SubscriberSpec) -> Result<Arc<Subscriber>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        let client = scope.resolve::<Client>("client", &spec.client)?;
        let topic = scope.resolve::<Topic>("topic", &spec.topic)?;
        let outlet = scope.resolve::<Outlet>("outlet", &spec.outlet)?;
        let tracer = scope.resolve::<Tracer>("tracer", &spec.tracer)?;
        check_reach(&scope, &client, &topic)?;
        if let Some(target) = outlet.forward_target() {
            if forwards_into(&self.stores, target.name(), topic.name()) {
                return Err(scope.invalid(format!(
                    "outlet '{}' forwards to '{}', which leads back to '{}'",
                    outlet.name(),
                    target.name(),
                    topic.name()
                )));
            }
        }

        let queue_capacity = spec.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let subscription = topic
            .subscribe(&spec.name, queue_capacity)
            .map_err(|e| scope.invalid(e.to_string()))?;

        let subscriber = Arc::new(Subscriber {
            name: Arc::from(spec.name.as_str()),
            client,
            topic,
            outlet,
            tracer,
            queue_capacity,
            subscription: Mutex::new(Some(subscription)),
            lifecycle: LifecycleCell::new(),
            received: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
        scope
            .admit(&self.stores.subscribers, Arc::clone(&subscriber))
            .inspect_err(|_| subscriber.detach())
    }

    fn remove(&self, name: &str) {
        if let Some(subscriber) = withdraw(&self.stores, &self.stores.subscribers, name) {
            subscriber.detach();
        }
    }
}
