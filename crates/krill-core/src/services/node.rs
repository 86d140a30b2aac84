//! Nodes: devices placed at a site. A node's attributes and its uplink give
//! renderers their device context.

use super::{withdraw, EntityService, Scope, Site};
use crate::error::BuildError;
use crate::registry::Entity;
use crate::store::Stores;
use krill_types::{EdgeDirection, EntityKind, NodeSpec};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Peer name used when an edge leaves the simulated topology.
pub const EXTERNAL: &str = "external";

/// One edge as seen from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub edge: String,
    /// The other end; `None` is the outside world.
    pub peer: Option<String>,
    /// True when this node sends along the edge.
    pub outbound: bool,
}

#[derive(Debug)]
pub struct Node {
    name: String,
    site: Arc<Site>,
    attributes: BTreeMap<String, Value>,
    links: RwLock<Vec<Link>>,
}

impl Node {
    #[must_use]
    pub fn site(&self) -> &Arc<Site> {
        &self.site
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    #[must_use]
    pub fn links(&self) -> Vec<Link> {
        self.links.read().clone()
    }

    /// Where this node's traffic goes first: the peer of its first outbound
    /// link, or [`EXTERNAL`].
    #[must_use]
    pub fn uplink(&self) -> String {
        self.links
            .read()
            .iter()
            .find(|link| link.outbound)
            .and_then(|link| link.peer.clone())
            .unwrap_or_else(|| EXTERNAL.to_string())
    }

    pub(crate) fn link(&self, edge: &str, peer: Option<&str>, direction: EdgeDirection, is_source: bool) {
        let outbound = match direction {
            EdgeDirection::Uplink => is_source,
            EdgeDirection::Downlink => !is_source,
            EdgeDirection::Bidirectional => true,
        };
        self.links.write().push(Link {
            edge: edge.to_string(),
            peer: peer.map(str::to_string),
            outbound,
        });
    }

    pub(crate) fn unlink(&self, edge: &str) {
        self.links.write().retain(|link| link.edge != edge);
    }
}

impl Entity for Node {
    const KIND: EntityKind = EntityKind::Node;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct NodeService {
    stores: Arc<Stores>,
}

impl NodeService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for NodeService {
    type Spec = NodeSpec;
    type Entity = Node;

    fn create(&self, spec: &NodeSpec) -> Result<Arc<Node>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        let site = scope.resolve::<Site>("site", &spec.site)?;

        let node = Arc::new(Node {
            name: spec.name.clone(),
            site: Arc::clone(&site),
            attributes: spec.attributes.clone(),
            links: RwLock::new(Vec::new()),
        });
        let node = scope.admit(&self.stores.nodes, node)?;
        site.add_node(&spec.name);
        Ok(node)
    }

    fn remove(&self, name: &str) {
        if let Some(node) = withdraw(&self.stores, &self.stores.nodes, name) {
            node.site.remove_node(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::SiteService;
    use krill_types::SiteSpec;

    fn setup() -> (Arc<Stores>, NodeService) {
        let stores = Stores::new();
        SiteService::new(Arc::clone(&stores))
            .create(&SiteSpec { name: "s1".into() })
            .unwrap();
        let service = NodeService::new(Arc::clone(&stores));
        (stores, service)
    }

    fn spec(name: &str, site: &str) -> NodeSpec {
        let mut attributes = BTreeMap::new();
        attributes.insert("model".to_string(), Value::from("th-100"));
        NodeSpec {
            name: name.into(),
            site: site.into(),
            attributes,
        }
    }

    #[test]
    fn test_node_joins_site() {
        let (stores, service) = setup();
        let node = service.create(&spec("n1", "s1")).unwrap();

        assert_eq!(node.attribute("model"), Some(&Value::from("th-100")));
        assert_eq!(node.uplink(), EXTERNAL);
        assert!(stores.sites.get("s1").unwrap().contains("n1"));

        service.remove("n1");
        assert!(!stores.sites.get("s1").unwrap().contains("n1"));
    }

    #[test]
    fn test_unknown_site() {
        let (_stores, service) = setup();
        let err = service.create(&spec("n1", "s9")).unwrap_err();
        assert!(matches!(
            err,
            BuildError::UnresolvedReference {
                kind: EntityKind::Site,
                field: "site",
                ..
            }
        ));
    }

    #[test]
    fn test_uplink_direction() {
        let (_stores, service) = setup();
        let node = service.create(&spec("n1", "s1")).unwrap();

        node.link("e-in", Some("n0"), EdgeDirection::Uplink, false);
        assert_eq!(node.uplink(), EXTERNAL);

        node.link("e-down", Some("gw"), EdgeDirection::Downlink, false);
        assert_eq!(node.uplink(), "gw");

        node.unlink("e-down");
        assert_eq!(node.links().len(), 1);
    }
}
