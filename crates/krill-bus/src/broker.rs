//! # Broker
//!
//! Owns a set of topics. Delivery never crosses brokers.

use crate::error::BusError;
use crate::topic::Topic;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A simulated message broker.
#[derive(Debug)]
pub struct Broker {
    name: String,
    topics: RwLock<BTreeMap<String, Arc<Topic>>>,
}

impl Broker {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            topics: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a topic owned by this broker.
    pub fn create_topic(&self, name: &str) -> Result<Arc<Topic>, BusError> {
        let mut topics = self.topics.write();
        if topics.contains_key(name) {
            return Err(BusError::TopicExists {
                broker: self.name.clone(),
                topic: name.to_string(),
            });
        }
        let topic = Arc::new(Topic::new(name, &self.name));
        topics.insert(name.to_string(), Arc::clone(&topic));
        debug!(broker = %self.name, topic = name, "Topic created");
        Ok(topic)
    }

    /// Remove a topic; used when a build is rolled back.
    pub fn remove_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.write().remove(name)
    }

    /// Look up an owned topic.
    #[must_use]
    pub fn topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.read().get(name).cloned()
    }

    #[must_use]
    pub fn owns(&self, topic: &str) -> bool {
        self.topics.read().contains_key(topic)
    }

    /// Owned topic names, sorted.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_lookup_topic() {
        let broker = Broker::new("b1");
        let topic = broker.create_topic("t1").unwrap();

        assert_eq!(topic.broker(), "b1");
        assert!(broker.owns("t1"));
        assert!(Arc::ptr_eq(&broker.topic("t1").unwrap(), &topic));
        assert!(broker.topic("t2").is_none());
    }

    #[test]
    fn test_duplicate_topic_rejected() {
        let broker = Broker::new("b1");
        broker.create_topic("t1").unwrap();
        assert!(matches!(
            broker.create_topic("t1"),
            Err(BusError::TopicExists { .. })
        ));
    }

    #[test]
    fn test_remove_topic() {
        let broker = Broker::new("b1");
        broker.create_topic("b").unwrap();
        broker.create_topic("a").unwrap();
        assert_eq!(broker.topic_names(), vec!["a".to_string(), "b".to_string()]);

        assert!(broker.remove_topic("a").is_some());
        assert!(!broker.owns("a"));
    }
}
