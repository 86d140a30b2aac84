//! # Topic
//!
//! An addressable channel owned by one broker. Publishing fans a message out
//! to a point-in-time snapshot of the subscriber set.

use crate::error::BusError;
use crate::message::Message;
use crate::subscription::Subscription;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Why a message did not reach a subscriber's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndeliveredReason {
    /// The publisher was cancelled while waiting for queue capacity.
    Cancelled,
    /// The subscriber's queue was closed.
    Closed,
}

impl UndeliveredReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone)]
pub struct PublishReport {
    /// Subscribers whose queue accepted the message.
    pub enqueued: Vec<Arc<str>>,
    /// Subscribers the message never reached.
    pub undelivered: Vec<(Arc<str>, UndeliveredReason)>,
}

impl PublishReport {
    /// True when every subscriber in the snapshot got the message.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.undelivered.is_empty()
    }
}

#[derive(Clone)]
struct Slot {
    name: Arc<str>,
    sender: mpsc::Sender<Message>,
}

/// A topic with a copy-on-write subscriber set.
pub struct Topic {
    name: Arc<str>,
    broker: Arc<str>,
    subscribers: RwLock<Arc<Vec<Slot>>>,
    messages_published: AtomicU64,
    messages_enqueued: AtomicU64,
}

impl Topic {
    pub(crate) fn new(name: &str, broker: &str) -> Self {
        Self {
            name: Arc::from(name),
            broker: Arc::from(broker),
            subscribers: RwLock::new(Arc::new(Vec::new())),
            messages_published: AtomicU64::new(0),
            messages_enqueued: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the topic name, for stamping messages.
    #[must_use]
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Owning broker.
    #[must_use]
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Attach a subscriber with a bounded inbound queue.
    pub fn subscribe(
        self: &Arc<Self>,
        subscriber: &str,
        capacity: usize,
    ) -> Result<Subscription, BusError> {
        if capacity == 0 {
            return Err(BusError::InvalidCapacity {
                subscriber: subscriber.to_string(),
                capacity,
            });
        }

        let (sender, receiver) = mpsc::channel(capacity);
        {
            let mut guard = self.subscribers.write();
            if guard.iter().any(|slot| &*slot.name == subscriber) {
                return Err(BusError::AlreadySubscribed {
                    topic: self.name.to_string(),
                    subscriber: subscriber.to_string(),
                });
            }
            let mut next = Vec::with_capacity(guard.len() + 1);
            next.extend(guard.iter().cloned());
            next.push(Slot {
                name: Arc::from(subscriber),
                sender,
            });
            *guard = Arc::new(next);
        }

        debug!(topic = %self.name, subscriber, capacity, "Subscriber attached");
        Ok(Subscription::new(
            Arc::downgrade(self),
            self.name_arc(),
            subscriber,
            receiver,
        ))
    }

    /// Remove a subscriber. Returns whether it was present.
    pub fn unsubscribe(&self, subscriber: &str) -> bool {
        let mut guard = self.subscribers.write();
        if !guard.iter().any(|slot| &*slot.name == subscriber) {
            return false;
        }
        let next: Vec<Slot> = guard
            .iter()
            .filter(|slot| &*slot.name != subscriber)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        debug!(topic = %self.name, subscriber, "Subscriber detached");
        true
    }

    /// Names of the current subscribers, in subscription order.
    #[must_use]
    pub fn subscribers(&self) -> Vec<Arc<str>> {
        self.subscribers
            .read()
            .iter()
            .map(|slot| Arc::clone(&slot.name))
            .collect()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Total publish calls on this topic.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Total messages accepted into subscriber queues.
    #[must_use]
    pub fn messages_enqueued(&self) -> u64 {
        self.messages_enqueued.load(Ordering::Relaxed)
    }

    /// Fan a message out to every subscriber present when the call starts.
    ///
    /// Waits for queue capacity when a subscriber is full. If `cancel` fires
    /// during such a wait, the blocked subscriber and all subscribers after it
    /// are reported as [`UndeliveredReason::Cancelled`]; queues that already
    /// accepted the message keep it.
    pub async fn publish(&self, message: Message, cancel: &CancellationToken) -> PublishReport {
        let snapshot = Arc::clone(&*self.subscribers.read());
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        let mut report = PublishReport::default();
        let mut slots = snapshot.iter();

        while let Some(slot) = slots.next() {
            match slot.sender.try_send(message.clone()) {
                Ok(()) => report.enqueued.push(Arc::clone(&slot.name)),
                Err(TrySendError::Closed(_)) => report
                    .undelivered
                    .push((Arc::clone(&slot.name), UndeliveredReason::Closed)),
                Err(TrySendError::Full(pending)) => {
                    trace!(topic = %self.name, subscriber = %slot.name, "Queue full, waiting");
                    tokio::select! {
                        biased;
                        sent = slot.sender.send(pending) => match sent {
                            Ok(()) => report.enqueued.push(Arc::clone(&slot.name)),
                            Err(_) => report
                                .undelivered
                                .push((Arc::clone(&slot.name), UndeliveredReason::Closed)),
                        },
                        () = cancel.cancelled() => {
                            report
                                .undelivered
                                .push((Arc::clone(&slot.name), UndeliveredReason::Cancelled));
                            report.undelivered.extend(
                                slots.by_ref().map(|rest| (Arc::clone(&rest.name), UndeliveredReason::Cancelled)),
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.messages_enqueued
            .fetch_add(report.enqueued.len() as u64, Ordering::Relaxed);
        trace!(
            topic = %self.name,
            sequence = message.sequence,
            receivers = report.enqueued.len(),
            undelivered = report.undelivered.len(),
            "Message published"
        );
        report
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("broker", &self.broker)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::test_message;
    use std::time::Duration;
    use tokio::time::timeout;

    fn topic() -> Arc<Topic> {
        Arc::new(Topic::new("t1", "b1"))
    }

    #[tokio::test]
    async fn test_publish_no_subscribers() {
        let topic = topic();
        let report = topic.publish(test_message(0), &CancellationToken::new()).await;

        assert!(report.enqueued.is_empty());
        assert!(report.is_complete());
        assert_eq!(topic.messages_published(), 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let topic = topic();
        let mut a = topic.subscribe("a", 4).unwrap();
        let mut b = topic.subscribe("b", 4).unwrap();

        let report = topic.publish(test_message(0), &CancellationToken::new()).await;
        assert_eq!(report.enqueued.len(), 2);
        assert_eq!(topic.messages_enqueued(), 2);

        let got_a = timeout(Duration::from_millis(100), a.recv()).await.unwrap().unwrap();
        let got_b = timeout(Duration::from_millis(100), b.recv()).await.unwrap().unwrap();
        assert_eq!(got_a.trace_id, got_b.trace_id);
    }

    #[tokio::test]
    async fn test_duplicate_subscriber_rejected() {
        let topic = topic();
        let _a = topic.subscribe("a", 4).unwrap();
        let err = topic.subscribe("a", 4).unwrap_err();
        assert!(matches!(err, BusError::AlreadySubscribed { .. }));
        assert_eq!(topic.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        let err = topic().subscribe("a", 0).unwrap_err();
        assert!(matches!(err, BusError::InvalidCapacity { capacity: 0, .. }));
    }

    #[tokio::test]
    async fn test_order_preserved_per_subscriber() {
        let topic = topic();
        let mut sub = topic.subscribe("a", 16).unwrap();
        let cancel = CancellationToken::new();

        for seq in 0..10 {
            topic.publish(test_message(seq), &cancel).await;
        }

        for expected in 0..10 {
            let msg = sub.try_recv().unwrap();
            assert_eq!(msg.sequence, expected);
        }
    }

    #[tokio::test]
    async fn test_full_queue_suspends_publisher() {
        let topic = topic();
        let mut sub = topic.subscribe("slow", 1).unwrap();
        let cancel = CancellationToken::new();

        topic.publish(test_message(0), &cancel).await;
        let blocked = timeout(Duration::from_millis(50), topic.publish(test_message(1), &cancel)).await;
        assert!(blocked.is_err(), "publish should wait for queue capacity");

        // Free a slot and publish again.
        assert_eq!(sub.try_recv().unwrap().sequence, 0);
        let report = timeout(Duration::from_millis(100), topic.publish(test_message(2), &cancel))
            .await
            .unwrap();
        assert_eq!(report.enqueued.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_blocked_fanout() {
        let topic = topic();
        let mut fast = topic.subscribe("fast", 8).unwrap();
        let _slow = topic.subscribe("slow", 1).unwrap();
        let _late = topic.subscribe("late", 8).unwrap();
        let cancel = CancellationToken::new();

        topic.publish(test_message(0), &cancel).await;

        let pending = {
            let topic = Arc::clone(&topic);
            let cancel = cancel.clone();
            tokio::spawn(async move { topic.publish(test_message(1), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let report = timeout(Duration::from_millis(100), pending).await.unwrap().unwrap();
        assert_eq!(&*report.enqueued[0], "fast");
        assert_eq!(report.undelivered.len(), 2);
        assert!(report
            .undelivered
            .iter()
            .all(|(_, reason)| *reason == UndeliveredReason::Cancelled));

        // The queue that accepted the message still has it.
        assert_eq!(fast.try_recv().unwrap().sequence, 0);
        assert_eq!(fast.try_recv().unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_late_joiner_not_in_snapshot() {
        let topic = topic();
        let _first = topic.subscribe("first", 1).unwrap();
        let cancel = CancellationToken::new();
        topic.publish(test_message(0), &cancel).await;

        let pending = {
            let topic = Arc::clone(&topic);
            let cancel = cancel.clone();
            tokio::spawn(async move { topic.publish(test_message(1), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut late = topic.subscribe("late", 4).unwrap();
        cancel.cancel();
        let report = timeout(Duration::from_millis(100), pending).await.unwrap().unwrap();

        assert!(report.undelivered.iter().all(|(name, _)| &**name == "first"));
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let topic = topic();
        let sub = topic.subscribe("a", 4).unwrap();
        assert!(topic.unsubscribe("a"));
        assert!(!topic.unsubscribe("a"));
        assert_eq!(topic.subscriber_count(), 0);
        drop(sub);
    }
}
