//! Clients: simulated network endpoints bound to one site and one broker.
//! Publishers and subscribers act through a client, which counts the traffic.

use super::{withdraw, EntityService, Scope, Site};
use crate::error::BuildError;
use crate::registry::Entity;
use crate::store::Stores;
use krill_bus::{Broker, Topic};
use krill_types::{ClientSpec, EntityKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Traffic counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
}

#[derive(Debug)]
pub struct Client {
    name: String,
    site: Arc<Site>,
    broker: Arc<Broker>,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
}

impl Client {
    #[must_use]
    pub fn site(&self) -> &Arc<Site> {
        &self.site
    }

    #[must_use]
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// True if `topic` is reachable through this client's broker.
    #[must_use]
    pub fn reaches(&self, topic: &Topic) -> bool {
        topic.broker() == self.broker.name()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

impl Entity for Client {
    const KIND: EntityKind = EntityKind::Client;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct ClientService {
    stores: Arc<Stores>,
}

impl ClientService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for ClientService {
    type Spec = ClientSpec;
    type Entity = Client;

    fn create(&self, spec: &ClientSpec) -> Result<Arc<Client>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        let site = scope.resolve::<Site>("site", &spec.site)?;
        let broker = scope.resolve::<Broker>("broker", &spec.broker)?;

        scope.admit(
            &self.stores.clients,
            Arc::new(Client {
                name: spec.name.clone(),
                site,
                broker,
                messages_sent: AtomicU64::new(0),
                bytes_sent: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
            }),
        )
    }

    fn remove(&self, name: &str) {
        withdraw(&self.stores, &self.stores.clients, name);
    }
}

/// Reject a topic that lives on a different broker than the client.
pub(crate) fn check_reach(scope: &Scope<'_>, client: &Client, topic: &Topic) -> Result<(), BuildError> {
    if client.reaches(topic) {
        Ok(())
    } else {
        Err(scope.invalid(format!(
            "topic '{}' belongs to broker '{}' but client '{}' is bound to broker '{}'",
            topic.name(),
            topic.broker(),
            client.name,
            client.broker.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{BrokerService, SiteService, TopicService};
    use krill_types::{BrokerSpec, SiteSpec, TopicSpec};

    #[test]
    fn test_client_binding_and_stats() {
        let stores = Stores::new();
        SiteService::new(Arc::clone(&stores))
            .create(&SiteSpec { name: "s1".into() })
            .unwrap();
        let brokers = BrokerService::new(Arc::clone(&stores));
        brokers.create(&BrokerSpec { name: "b1".into() }).unwrap();
        brokers.create(&BrokerSpec { name: "b2".into() }).unwrap();
        let topics = TopicService::new(Arc::clone(&stores));
        let t1 = topics
            .create(&TopicSpec {
                name: "t1".into(),
                broker: "b1".into(),
            })
            .unwrap();
        let t2 = topics
            .create(&TopicSpec {
                name: "t2".into(),
                broker: "b2".into(),
            })
            .unwrap();

        let client = ClientService::new(Arc::clone(&stores))
            .create(&ClientSpec {
                name: "c1".into(),
                site: "s1".into(),
                broker: "b1".into(),
            })
            .unwrap();

        assert!(client.reaches(&t1));
        assert!(!client.reaches(&t2));

        client.record_sent(10);
        client.record_sent(5);
        client.record_received(7);
        assert_eq!(
            client.stats(),
            ClientStats {
                messages_sent: 2,
                bytes_sent: 15,
                messages_received: 1,
                bytes_received: 7,
            }
        );
    }

    #[test]
    fn test_client_needs_broker() {
        let stores = Stores::new();
        SiteService::new(Arc::clone(&stores))
            .create(&SiteSpec { name: "s1".into() })
            .unwrap();
        let err = ClientService::new(stores)
            .create(&ClientSpec {
                name: "c1".into(),
                site: "s1".into(),
                broker: "nope".into(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::UnresolvedReference {
                kind: EntityKind::Broker,
                field: "broker",
                ..
            }
        ));
    }
}
