//! Edges: directed relations between two nodes, or between a node and the
//! outside world.

use super::{withdraw, EntityService, Node, Scope};
use crate::error::BuildError;
use crate::registry::Entity;
use crate::store::Stores;
use krill_types::{EdgeDirection, EdgeSpec, EntityKind};
use std::sync::Arc;

#[derive(Debug)]
pub struct Edge {
    name: String,
    source: Arc<Node>,
    destination: Option<Arc<Node>>,
    direction: EdgeDirection,
}

impl Edge {
    #[must_use]
    pub fn source(&self) -> &Arc<Node> {
        &self.source
    }

    /// `None` when the edge leaves the topology.
    #[must_use]
    pub fn destination(&self) -> Option<&Arc<Node>> {
        self.destination.as_ref()
    }

    #[must_use]
    pub fn direction(&self) -> EdgeDirection {
        self.direction
    }
}

impl Entity for Edge {
    const KIND: EntityKind = EntityKind::Edge;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct EdgeService {
    stores: Arc<Stores>,
}

impl EdgeService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for EdgeService {
    type Spec = EdgeSpec;
    type Entity = Edge;

    fn create(&self, spec: &EdgeSpec) -> Result<Arc<Edge>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        let source = scope.resolve::<Node>("source", &spec.source)?;
        let destination = scope.resolve_opt::<Node>("destination", spec.destination.as_deref())?;

        if destination.as_ref().is_some_and(|d| Arc::ptr_eq(d, &source)) {
            return Err(scope.invalid("source and destination must differ"));
        }

        let edge = scope.admit(
            &self.stores.edges,
            Arc::new(Edge {
                name: spec.name.clone(),
                source: Arc::clone(&source),
                destination: destination.clone(),
                direction: spec.direction,
            }),
        )?;

        source.link(&spec.name, spec.destination.as_deref(), spec.direction, true);
        if let Some(destination) = &destination {
            destination.link(&spec.name, Some(&spec.source), spec.direction, false);
        }
        Ok(edge)
    }

    fn remove(&self, name: &str) {
        if let Some(edge) = withdraw(&self.stores, &self.stores.edges, name) {
            edge.source.unlink(name);
            if let Some(destination) = &edge.destination {
                destination.unlink(name);
            }
        }
    }
}
