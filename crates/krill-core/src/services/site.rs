//! Sites: physical or logical locations containing nodes.

use super::{withdraw, EntityService, Scope};
use crate::error::BuildError;
use crate::registry::Entity;
use crate::store::Stores;
use krill_types::{EntityKind, SiteSpec};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug)]
pub struct Site {
    name: String,
    nodes: RwLock<BTreeSet<String>>,
}

impl Site {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: RwLock::new(BTreeSet::new()),
        }
    }

    /// Names of contained nodes, sorted.
    #[must_use]
    pub fn nodes(&self) -> Vec<String> {
        self.nodes.read().iter().cloned().collect()
    }

    #[must_use]
    pub fn contains(&self, node: &str) -> bool {
        self.nodes.read().contains(node)
    }

    pub(crate) fn add_node(&self, node: &str) {
        self.nodes.write().insert(node.to_string());
    }

    pub(crate) fn remove_node(&self, node: &str) {
        self.nodes.write().remove(node);
    }
}

impl Entity for Site {
    const KIND: EntityKind = EntityKind::Site;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct SiteService {
    stores: Arc<Stores>,
}

impl SiteService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for SiteService {
    type Spec = SiteSpec;
    type Entity = Site;

    fn create(&self, spec: &SiteSpec) -> Result<Arc<Site>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        scope.admit(&self.stores.sites, Arc::new(Site::new(scope.name())))
    }

    fn remove(&self, name: &str) {
        withdraw(&self.stores, &self.stores.sites, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_site() {
        let stores = Stores::new();
        let service = SiteService::new(Arc::clone(&stores));
        let site = service.create(&SiteSpec { name: "s1".into() }).unwrap();

        assert_eq!(site.name(), "s1");
        assert!(site.nodes().is_empty());
        assert_eq!(stores.sites.len(), 1);
        assert_eq!(stores.registry.count(EntityKind::Site), 1);

        service.remove("s1");
        assert!(stores.sites.is_empty());
        assert!(stores.registry.is_empty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let stores = Stores::new();
        let service = SiteService::new(stores);
        assert!(matches!(
            service.create(&SiteSpec { name: " ".into() }),
            Err(BuildError::InvalidSpec { .. })
        ));
    }
}
