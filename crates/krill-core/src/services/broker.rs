//! Brokers: the owners of topics.

use super::{withdraw, EntityService, Scope};
use crate::error::BuildError;
use crate::registry::Entity;
use crate::store::Stores;
use krill_bus::Broker;
use krill_types::{BrokerSpec, EntityKind};
use std::sync::Arc;

impl Entity for Broker {
    const KIND: EntityKind = EntityKind::Broker;

    fn name(&self) -> &str {
        Broker::name(self)
    }
}

pub struct BrokerService {
    stores: Arc<Stores>,
}

impl BrokerService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for BrokerService {
    type Spec = BrokerSpec;
    type Entity = Broker;

    fn create(&self, spec: &BrokerSpec) -> Result<Arc<Broker>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        scope.admit(&self.stores.brokers, Arc::new(Broker::new(scope.name())))
    }

    fn remove(&self, name: &str) {
        withdraw(&self.stores, &self.stores.brokers, name);
    }
}
