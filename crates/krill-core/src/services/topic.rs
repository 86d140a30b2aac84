//! Topics: addressable channels, each owned by exactly one broker.

use super::{withdraw, EntityService, Scope};
use crate::error::BuildError;
use crate::registry::Entity;
use crate::store::Stores;
use krill_bus::{Broker, Topic};
use krill_types::{EntityKind, TopicSpec};
use std::sync::Arc;

impl Entity for Topic {
    const KIND: EntityKind = EntityKind::Topic;

    fn name(&self) -> &str {
        Topic::name(self)
    }
}

pub struct TopicService {
    stores: Arc<Stores>,
}

impl TopicService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for TopicService {
    type Spec = TopicSpec;
    type Entity = Topic;

    fn create(&self, spec: &TopicSpec) -> Result<Arc<Topic>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        let broker = scope.resolve::<Broker>("broker", &spec.broker)?;

        let topic = broker
            .create_topic(&spec.name)
            .map_err(|e| scope.invalid(e.to_string()))?;

        scope.admit(&self.stores.topics, topic).inspect_err(|_| {
            broker.remove_topic(&spec.name);
        })
    }

    fn remove(&self, name: &str) {
        if let Some(topic) = withdraw(&self.stores, &self.stores.topics, name) {
            if let Some(broker) = self.stores.brokers.get(topic.broker()) {
                broker.remove_topic(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::BrokerService;
    use krill_types::BrokerSpec;

    fn topic_spec(name: &str, broker: &str) -> TopicSpec {
        TopicSpec {
            name: name.into(),
            broker: broker.into(),
        }
    }

    #[test]
    fn test_topic_owned_by_broker() {
        let stores = Stores::new();
        let broker = BrokerService::new(Arc::clone(&stores))
            .create(&BrokerSpec { name: "b1".into() })
            .unwrap();
        let service = TopicService::new(Arc::clone(&stores));

        let topic = service.create(&topic_spec("t1", "b1")).unwrap();
        assert_eq!(topic.broker(), "b1");
        assert!(broker.owns("t1"));

        service.remove("t1");
        assert!(!broker.owns("t1"));
        assert!(stores.topics.is_empty());
    }

    #[test]
    fn test_topic_name_is_global() {
        let stores = Stores::new();
        BrokerService::new(Arc::clone(&stores))
            .create(&BrokerSpec { name: "b1".into() })
            .unwrap();
        let service = TopicService::new(Arc::clone(&stores));

        let err = service.create(&topic_spec("b1", "b1")).unwrap_err();
        assert!(matches!(
            err,
            BuildError::DuplicateName {
                existing: EntityKind::Broker,
                attempted: EntityKind::Topic,
                ..
            }
        ));
    }
}
