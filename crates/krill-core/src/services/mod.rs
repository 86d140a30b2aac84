//! # Entity Services
//!
//! One service per entity kind. Each implements [`EntityService`]: `create`
//! resolves a `*Spec`'s cross-references through the registry, validates its
//! fields, then admits the entity into the registry and its store. `remove`
//! undoes exactly that, and is what build rollback calls.

use crate::error::{BuildError, RegistryError};
use crate::registry::Entity;
use crate::store::{Store, Stores};
use krill_types::{EntityKind, NamedSpec};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

mod broker;
mod client;
mod codec;
mod edge;
mod formatter;
mod limiter;
mod node;
mod observer;
mod outlet;
mod provider;
mod publisher;
mod renderer;
mod site;
mod subscriber;
mod template;
mod topic;
mod tracer;

pub use broker::BrokerService;
pub use client::{Client, ClientService, ClientStats};
pub use codec::{Codec, JsonCodec, Payload, TextCodec, YamlCodec};
pub use edge::{Edge, EdgeService};
pub use formatter::{Formatter, FormatterService};
pub use limiter::{Limiter, LimiterService};
pub use node::{Link, Node, NodeService, EXTERNAL};
pub use observer::{Observer, ObserverSample, ObserverService};
pub use outlet::{
    Collected, CollectSink, CountSink, Delivery, DiscardSink, ForwardSink, LogSink, Outlet,
    OutletService, OutletSink,
};
pub use provider::ProviderService;
pub use publisher::{Publisher, PublisherService};
pub use renderer::{Renderer, RendererService};
pub use site::{Site, SiteService};
pub use subscriber::{Subscriber, SubscriberService};
pub use template::{RenderContext, Template};
pub use topic::TopicService;
pub use tracer::{DeliveryOutcome, TraceId, TraceRecord, TraceSummary, Tracer, TracerService};

/// Creates and removes the entities of one kind.
pub trait EntityService {
    type Spec: NamedSpec;
    type Entity: Entity;

    /// Build one entity from its spec and register it.
    fn create(&self, spec: &Self::Spec) -> Result<Arc<Self::Entity>, BuildError>;

    /// Undo a successful `create`.
    fn remove(&self, name: &str);
}

/// Publisher and subscriber task state. Stopped is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Running,
    Stopped,
}

#[derive(Debug)]
pub(crate) struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    const CREATED: u8 = 0;
    const RUNNING: u8 = 1;
    const STOPPED: u8 = 2;

    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Self::CREATED))
    }

    pub(crate) fn get(&self) -> Lifecycle {
        match self.0.load(Ordering::Acquire) {
            Self::CREATED => Lifecycle::Created,
            Self::RUNNING => Lifecycle::Running,
            _ => Lifecycle::Stopped,
        }
    }

    /// Created → Running. Fails for any other state.
    pub(crate) fn start(&self) -> bool {
        self.0
            .compare_exchange(
                Self::CREATED,
                Self::RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn stop(&self) {
        self.0.store(Self::STOPPED, Ordering::Release);
    }
}

/// Build-time context for one spec: who is being created, and where.
pub(crate) struct Scope<'a> {
    stores: &'a Stores,
    kind: EntityKind,
    name: &'a str,
}

impl<'a> Scope<'a> {
    /// Check the name is usable before anything is resolved.
    pub(crate) fn open<S: NamedSpec>(stores: &'a Stores, spec: &'a S) -> Result<Self, BuildError> {
        let scope = Self {
            stores,
            kind: S::KIND,
            name: spec.name(),
        };
        if scope.name.trim().is_empty() {
            return Err(scope.invalid("name must not be empty"));
        }
        if let Some(existing) = stores.registry.kind_of(scope.name) {
            return Err(BuildError::DuplicateName {
                name: scope.name.to_string(),
                existing,
                attempted: scope.kind,
            });
        }
        Ok(scope)
    }

    pub(crate) fn name(&self) -> &'a str {
        self.name
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> BuildError {
        BuildError::InvalidSpec {
            kind: self.kind,
            name: self.name.to_string(),
            reason: reason.into(),
        }
    }

    /// Resolve a required reference held in `field`.
    pub(crate) fn resolve<T: Entity>(&self, field: &'static str, target: &str) -> Result<Arc<T>, BuildError> {
        self.stores
            .registry
            .resolve_as::<T>(target)
            .map_err(|e| match e {
                RegistryError::NotFound { name } => BuildError::UnresolvedReference {
                    kind: T::KIND,
                    name,
                    referenced_by_kind: self.kind,
                    referenced_by: self.name.to_string(),
                    field,
                },
                RegistryError::KindMismatch {
                    name,
                    expected,
                    found,
                } => BuildError::KindMismatch {
                    name,
                    expected,
                    found,
                    referenced_by_kind: self.kind,
                    referenced_by: self.name.to_string(),
                    field,
                },
                other => self.invalid(other.to_string()),
            })
    }

    pub(crate) fn resolve_opt<T: Entity>(
        &self,
        field: &'static str,
        target: Option<&str>,
    ) -> Result<Option<Arc<T>>, BuildError> {
        target.map(|t| self.resolve::<T>(field, t)).transpose()
    }

    /// Register the finished entity and put it in its store.
    pub(crate) fn admit<T: Entity>(&self, store: &Store<T>, entity: Arc<T>) -> Result<Arc<T>, BuildError> {
        self.stores
            .registry
            .register_entity(&entity)
            .map_err(|e| match e {
                RegistryError::DuplicateName {
                    name,
                    existing,
                    attempted,
                } => BuildError::DuplicateName {
                    name,
                    existing,
                    attempted,
                },
                other => self.invalid(other.to_string()),
            })?;
        store.insert(Arc::clone(&entity));
        krill_telemetry::log_event!(debug, self.kind.name(), "Entity created", name = %self.name);
        Ok(entity)
    }
}

/// Take an entity out of its store and the registry.
pub(crate) fn withdraw<T: Entity>(stores: &Stores, store: &Store<T>, name: &str) -> Option<Arc<T>> {
    stores.registry.deregister(name);
    let removed = store.remove(name);
    if removed.is_some() {
        krill_telemetry::log_event!(debug, T::KIND.name(), "Entity removed", name = %name);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_never_restarts() {
        let cell = LifecycleCell::new();
        assert_eq!(cell.get(), Lifecycle::Created);
        assert!(cell.start());
        assert_eq!(cell.get(), Lifecycle::Running);
        assert!(!cell.start());
        cell.stop();
        assert_eq!(cell.get(), Lifecycle::Stopped);
        assert!(!cell.start());
    }
}
