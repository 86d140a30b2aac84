//! # Entity Stores
//!
//! One keyed collection per entity kind, all created empty at startup and
//! filled only while the graph is built.

use crate::registry::{Entity, Registry};
use crate::services::{
    Client, Edge, Formatter, Limiter, Node, Observer, Outlet, Publisher, Renderer, Site,
    Subscriber, Tracer,
};
use krill_bus::{Broker, Topic};
use krill_telemetry::MetricsProvider;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name-keyed storage for one entity type.
pub struct Store<T> {
    items: RwLock<BTreeMap<String, Arc<T>>>,
}

impl<T: Entity> Store<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn insert(&self, entity: Arc<T>) {
        self.items.write().insert(entity.name().to_string(), entity);
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<T>> {
        self.items.write().remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.items.read().get(name).cloned()
    }

    /// All entities, sorted by name.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<T>> {
        self.items.read().values().cloned().collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl<T: Entity> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Every store plus the registry, shared by all services.
#[derive(Default)]
pub struct Stores {
    pub registry: Arc<Registry>,
    pub sites: Store<Site>,
    pub nodes: Store<Node>,
    pub edges: Store<Edge>,
    pub brokers: Store<Broker>,
    pub topics: Store<Topic>,
    pub clients: Store<Client>,
    pub formatters: Store<Formatter>,
    pub renderers: Store<Renderer>,
    pub limiters: Store<Limiter>,
    pub outlets: Store<Outlet>,
    pub tracers: Store<Tracer>,
    pub providers: Store<MetricsProvider>,
    pub subscribers: Store<Subscriber>,
    pub publishers: Store<Publisher>,
    pub observers: Store<Observer>,
}

impl Stores {
    /// Empty stores around a fresh registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total entities across every store.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.registry.len()
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("entities", &self.registry.len())
            .finish()
    }
}
