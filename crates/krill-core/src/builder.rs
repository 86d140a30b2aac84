//! # Graph Builder
//!
//! Turns a [`SimulationConfig`] into a runnable [`Simulation`].
//!
//! ## Creation order
//!
//! ```text
//! Site → Node → Edge → Broker → Topic → Client
//!   → Formatter → Renderer → Limiter → Outlet → Tracer
//!   → Provider → Subscriber → Publisher → Observer
//! ```
//!
//! Every entity can only reference kinds created before it. Subscribers come
//! before publishers so each topic's subscriber set is complete before any
//! traffic can flow.
//!
//! ## Atomicity
//!
//! The first failure aborts the build. Every entity created so far is removed
//! again in reverse order, which also detaches subscriptions and unregisters
//! provider metrics. No partial graph is ever returned.

use crate::error::BuildError;
use crate::services::{
    BrokerService, ClientService, EdgeService, EntityService, FormatterService, LimiterService,
    NodeService, ObserverService, OutletService, ProviderService, PublisherService,
    RendererService, SiteService, SubscriberService, TopicService, TracerService,
};
use crate::simulation::Simulation;
use crate::store::Stores;
use krill_telemetry::log_event;
use krill_types::{EntityKind, NamedSpec, SimulationConfig};
use std::sync::Arc;

const SERVICE: &str = "builder";

/// One service per entity kind, all sharing the same stores.
pub struct Services {
    stores: Arc<Stores>,
    pub sites: SiteService,
    pub nodes: NodeService,
    pub edges: EdgeService,
    pub brokers: BrokerService,
    pub topics: TopicService,
    pub clients: ClientService,
    pub formatters: FormatterService,
    pub renderers: RendererService,
    pub limiters: LimiterService,
    pub outlets: OutletService,
    pub tracers: TracerService,
    pub providers: ProviderService,
    pub subscribers: SubscriberService,
    pub publishers: PublisherService,
    pub observers: ObserverService,
}

impl Services {
    /// Wire every service to `stores`. Providers register into `metrics`.
    pub fn new(stores: Arc<Stores>, metrics: prometheus::Registry) -> Self {
        Self {
            sites: SiteService::new(Arc::clone(&stores)),
            nodes: NodeService::new(Arc::clone(&stores)),
            edges: EdgeService::new(Arc::clone(&stores)),
            brokers: BrokerService::new(Arc::clone(&stores)),
            topics: TopicService::new(Arc::clone(&stores)),
            clients: ClientService::new(Arc::clone(&stores)),
            formatters: FormatterService::new(Arc::clone(&stores)),
            renderers: RendererService::new(Arc::clone(&stores)),
            limiters: LimiterService::new(Arc::clone(&stores)),
            outlets: OutletService::new(Arc::clone(&stores)),
            tracers: TracerService::new(Arc::clone(&stores)),
            providers: ProviderService::new(Arc::clone(&stores), metrics),
            subscribers: SubscriberService::new(Arc::clone(&stores)),
            publishers: PublisherService::new(Arc::clone(&stores)),
            observers: ObserverService::new(Arc::clone(&stores)),
            stores,
        }
    }

    #[must_use]
    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    /// Remove one entity through the service that owns its kind.
    pub fn remove(&self, kind: EntityKind, name: &str) {
        match kind {
            EntityKind::Site => self.sites.remove(name),
            EntityKind::Node => self.nodes.remove(name),
            EntityKind::Edge => self.edges.remove(name),
            EntityKind::Broker => self.brokers.remove(name),
            EntityKind::Topic => self.topics.remove(name),
            EntityKind::Client => self.clients.remove(name),
            EntityKind::Formatter => self.formatters.remove(name),
            EntityKind::Renderer => self.renderers.remove(name),
            EntityKind::Limiter => self.limiters.remove(name),
            EntityKind::Outlet => self.outlets.remove(name),
            EntityKind::Tracer => self.tracers.remove(name),
            EntityKind::Provider => self.providers.remove(name),
            EntityKind::Subscriber => self.subscribers.remove(name),
            EntityKind::Publisher => self.publishers.remove(name),
            EntityKind::Observer => self.observers.remove(name),
            EntityKind::Registry => {}
        }
    }
}

/// Entities created so far, in creation order.
type Journal = Vec<(EntityKind, String)>;

pub struct Builder {
    services: Services,
}

impl Builder {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Build the whole graph or nothing.
    pub fn parse(&self, config: &SimulationConfig) -> Result<Simulation, BuildError> {
        let mut journal = Journal::with_capacity(config.entity_count());

        if let Err(e) = self.create_all(config, &mut journal) {
            log_event!(
                error,
                SERVICE,
                "Build failed, rolling back",
                error = %e,
                created = journal.len()
            );
            self.rollback(journal);
            return Err(e);
        }

        let stores = Arc::clone(self.services.stores());
        for provider in stores.providers.all() {
            provider.seal();
        }
        log_event!(info, SERVICE, "Graph built", entities = stores.entity_count());
        Ok(Simulation::new(stores))
    }

    fn create_all(&self, config: &SimulationConfig, journal: &mut Journal) -> Result<(), BuildError> {
        let s = &self.services;
        create_each(&s.sites, &config.sites, journal)?;
        create_each(&s.nodes, &config.nodes, journal)?;
        create_each(&s.edges, &config.edges, journal)?;
        create_each(&s.brokers, &config.brokers, journal)?;
        create_each(&s.topics, &config.topics, journal)?;
        create_each(&s.clients, &config.clients, journal)?;
        create_each(&s.formatters, &config.formatters, journal)?;
        create_each(&s.renderers, &config.renderers, journal)?;
        create_each(&s.limiters, &config.limiters, journal)?;
        create_each(&s.outlets, &config.outlets, journal)?;
        create_each(&s.tracers, &config.tracers, journal)?;
        create_each(&s.providers, &config.providers, journal)?;
        create_each(&s.subscribers, &config.subscribers, journal)?;
        create_each(&s.publishers, &config.publishers, journal)?;
        create_each(&s.observers, &config.observers, journal)?;
        Ok(())
    }

    fn rollback(&self, journal: Journal) {
        for (kind, name) in journal.into_iter().rev() {
            self.services.remove(kind, &name);
        }
    }
}

fn create_each<S: EntityService>(
    service: &S,
    specs: &[S::Spec],
    journal: &mut Journal,
) -> Result<(), BuildError> {
    for spec in specs {
        service.create(spec)?;
        journal.push((<S::Spec as NamedSpec>::KIND, spec.name().to_string()));
    }
    Ok(())
}
