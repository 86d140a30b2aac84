//! # Message
//!
//! The unit that travels from a publisher through a topic to subscribers.
//! Cloning is cheap: names are `Arc<str>` and the payload is `Bytes`, so each
//! subscriber queue shares the same encoded buffer.

use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// An encoded message in transit.
#[derive(Debug, Clone)]
pub struct Message {
    /// Correlation id assigned by the publishing tracer.
    pub trace_id: Uuid,
    /// Topic the message was published on.
    pub topic: Arc<str>,
    /// Publishing entity.
    pub publisher: Arc<str>,
    /// Per-publisher sequence number, starting at zero.
    pub sequence: u64,
    /// Encoded payload.
    pub payload: Bytes,
    /// When the publisher handed the message to the topic.
    pub published_at: Instant,
}

impl Message {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_message(sequence: u64) -> Message {
    Message {
        trace_id: Uuid::new_v4(),
        topic: Arc::from("t1"),
        publisher: Arc::from("p1"),
        sequence,
        payload: Bytes::from(format!("payload-{sequence}")),
        published_at: Instant::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_payload() {
        let msg = test_message(7);
        let copy = msg.clone();
        assert_eq!(msg.payload.as_ptr(), copy.payload.as_ptr());
        assert_eq!(copy.len(), "payload-7".len());
        assert!(!copy.is_empty());
    }
}
