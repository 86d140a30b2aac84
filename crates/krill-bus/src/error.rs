//! Bus errors.

use thiserror::Error;

/// Errors from topic and subscription management.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Topic name already taken on this broker.
    #[error("Topic '{topic}' already exists on broker '{broker}'")]
    TopicExists { broker: String, topic: String },

    /// Subscriber name already present on this topic.
    #[error("Subscriber '{subscriber}' already subscribed to topic '{topic}'")]
    AlreadySubscribed { topic: String, subscriber: String },

    /// Queue capacity must be at least one.
    #[error("Invalid queue capacity for subscriber '{subscriber}': {capacity}")]
    InvalidCapacity { subscriber: String, capacity: usize },

    /// The topic was dropped.
    #[error("Topic closed")]
    Closed,
}
