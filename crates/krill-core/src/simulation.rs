//! # Simulation
//!
//! A built graph, ready to run. [`Simulation::run`] spawns one task per
//! subscriber, observer and publisher, then waits for the shutdown token.
//!
//! ## Shutdown
//!
//! Shutdown is staged so no message is lost in flight:
//!
//! 1. publishers are cancelled and joined
//! 2. subscribers are cancelled, drain their queues, and are joined
//! 3. observers are cancelled, take a final sample, and are joined

use crate::registry::{Entity, Registry};
use crate::services::{Observer, Outlet, Publisher, Subscriber, TraceSummary, Tracer};
use crate::store::Stores;
use krill_telemetry::log_event;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const SERVICE: &str = "simulation";

/// Counts for the end-of-run report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationSummary {
    pub entities: usize,
    pub publishers: usize,
    pub subscribers: usize,
    /// Messages handed to topics.
    pub published: u64,
    /// Messages that failed to render or encode.
    pub publish_failures: u64,
    /// Messages taken off subscriber queues.
    pub received: u64,
    /// Deliveries that failed to decode or reach their outlet.
    pub delivery_failures: u64,
    pub traces: BTreeMap<String, TraceSummary>,
}

pub struct Simulation {
    stores: Arc<Stores>,
}

impl Simulation {
    pub(crate) fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }

    #[must_use]
    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.stores.registry
    }

    #[must_use]
    pub fn tracer(&self, name: &str) -> Option<Arc<Tracer>> {
        self.stores.tracers.get(name)
    }

    #[must_use]
    pub fn publisher(&self, name: &str) -> Option<Arc<Publisher>> {
        self.stores.publishers.get(name)
    }

    #[must_use]
    pub fn subscriber(&self, name: &str) -> Option<Arc<Subscriber>> {
        self.stores.subscribers.get(name)
    }

    #[must_use]
    pub fn outlet(&self, name: &str) -> Option<Arc<Outlet>> {
        self.stores.outlets.get(name)
    }

    #[must_use]
    pub fn observer(&self, name: &str) -> Option<Arc<Observer>> {
        self.stores.observers.get(name)
    }

    /// Run every task until `shutdown` fires, then stop them in stages.
    pub async fn run(&self, shutdown: CancellationToken) -> SimulationSummary {
        let publisher_stop = CancellationToken::new();
        let subscriber_stop = CancellationToken::new();
        let observer_stop = CancellationToken::new();

        let mut subscribers = JoinSet::new();
        for subscriber in self.stores.subscribers.all() {
            subscribers.spawn(subscriber.run(subscriber_stop.clone()));
        }
        let mut observers = JoinSet::new();
        for observer in self.stores.observers.all() {
            observers.spawn(observer.run(Arc::clone(&self.stores), observer_stop.clone()));
        }
        let mut publishers = JoinSet::new();
        for publisher in self.stores.publishers.all() {
            publishers.spawn(publisher.run(publisher_stop.clone()));
        }

        log_event!(
            info,
            SERVICE,
            "Simulation running",
            publishers = publishers.len(),
            subscribers = subscribers.len(),
            observers = observers.len()
        );

        shutdown.cancelled().await;
        log_event!(info, SERVICE, "Shutdown requested");

        publisher_stop.cancel();
        join_all(&mut publishers, "publisher").await;
        subscriber_stop.cancel();
        join_all(&mut subscribers, "subscriber").await;
        observer_stop.cancel();
        join_all(&mut observers, "observer").await;

        let summary = self.summary();
        log_event!(
            info,
            SERVICE,
            "Simulation stopped",
            published = summary.published,
            received = summary.received,
            publish_failures = summary.publish_failures,
            delivery_failures = summary.delivery_failures
        );
        summary
    }

    #[must_use]
    pub fn summary(&self) -> SimulationSummary {
        let publishers = self.stores.publishers.all();
        let subscribers = self.stores.subscribers.all();
        SimulationSummary {
            entities: self.stores.entity_count(),
            publishers: publishers.len(),
            subscribers: subscribers.len(),
            published: publishers.iter().map(|p| p.published()).sum(),
            publish_failures: publishers.iter().map(|p| p.failures()).sum(),
            received: subscribers.iter().map(|s| s.received()).sum(),
            delivery_failures: subscribers.iter().map(|s| s.failures()).sum(),
            traces: self
                .stores
                .tracers
                .all()
                .iter()
                .map(|t| (t.name().to_string(), t.summary()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation").field("stores", &self.stores).finish()
    }
}

async fn join_all(set: &mut JoinSet<()>, role: &str) {
    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            log_event!(error, SERVICE, "Task ended abnormally", role = role, error = %e);
        }
    }
}
