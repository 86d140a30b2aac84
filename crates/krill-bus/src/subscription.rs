//! # Subscription
//!
//! The receiving end of one subscriber's bounded queue. Dropping or detaching
//! a subscription removes it from the topic's subscriber set.

use crate::message::Message;
use crate::topic::Topic;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// A subscriber's handle on a topic.
pub struct Subscription {
    topic: Weak<Topic>,
    topic_name: Arc<str>,
    subscriber: Arc<str>,
    receiver: mpsc::Receiver<Message>,
    detached: bool,
}

impl Subscription {
    pub(crate) fn new(
        topic: Weak<Topic>,
        topic_name: Arc<str>,
        subscriber: &str,
        receiver: mpsc::Receiver<Message>,
    ) -> Self {
        Self {
            topic,
            topic_name,
            subscriber: Arc::from(subscriber),
            receiver,
            detached: false,
        }
    }

    /// Receive the next message.
    ///
    /// Returns `None` once the subscription is detached and its queue drained,
    /// or when the topic is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Take a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Leave the topic and close the queue.
    ///
    /// Messages already queued stay readable through [`recv`](Self::recv);
    /// publishers blocked on this queue are released with a closed outcome.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(topic) = self.topic.upgrade() {
            topic.unsubscribe(&self.subscriber);
        }
        self.receiver.close();
        debug!(topic = %self.topic_name, subscriber = %self.subscriber, "Subscription detached");
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic_name
    }

    #[must_use]
    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    /// Messages waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(topic) = self.topic.upgrade() {
            topic.unsubscribe(&self.subscriber);
        }
        debug!(topic = %self.topic_name, subscriber = %self.subscriber, "Subscription dropped");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic_name)
            .field("subscriber", &self.subscriber)
            .field("detached", &self.detached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::broker::Broker;
    use crate::message::test_message;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_subscription_recv() {
        let broker = Broker::new("b1");
        let topic = broker.create_topic("t1").unwrap();
        let mut sub = topic.subscribe("sub1", 8).unwrap();

        topic.publish(test_message(3), &CancellationToken::new()).await;

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("message");
        assert_eq!(received.sequence, 3);
        assert_eq!(sub.topic(), "t1");
        assert_eq!(sub.subscriber(), "sub1");
    }

    #[tokio::test]
    async fn test_subscription_drop_cleanup() {
        let broker = Broker::new("b1");
        let topic = broker.create_topic("t1").unwrap();

        {
            let _sub1 = topic.subscribe("sub1", 8).unwrap();
            let _sub2 = topic.subscribe("sub2", 8).unwrap();
            assert_eq!(topic.subscriber_count(), 2);
        }

        assert_eq!(topic.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_detach_drains_queued_messages() {
        let broker = Broker::new("b1");
        let topic = broker.create_topic("t1").unwrap();
        let mut sub = topic.subscribe("sub1", 8).unwrap();
        let cancel = CancellationToken::new();

        topic.publish(test_message(0), &cancel).await;
        topic.publish(test_message(1), &cancel).await;
        assert_eq!(sub.queued(), 2);

        sub.detach();
        assert!(sub.is_detached());
        assert_eq!(topic.subscriber_count(), 0);

        // Publishing after detach does not reach the closed queue.
        let report = topic.publish(test_message(2), &cancel).await;
        assert!(report.enqueued.is_empty());

        assert_eq!(sub.recv().await.unwrap().sequence, 0);
        assert_eq!(sub.recv().await.unwrap().sequence, 1);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let broker = Broker::new("b1");
        let topic = broker.create_topic("t1").unwrap();
        let mut sub = topic.subscribe("sub1", 8).unwrap();
        assert!(sub.try_recv().is_none());
    }
}
