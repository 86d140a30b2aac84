//! # Krill Bus - Simulated Publish/Subscribe Fabric
//!
//! A broker owns topics; a topic fans each message out to the bounded
//! inbound queue of every subscriber present when the publish started.
//!
//! ```text
//! ┌───────────┐  publish()   ┌──────────────┐   mpsc (bounded)   ┌──────────────┐
//! │ Publisher │ ───────────▶ │    Topic     │ ─────────────────▶ │ Subscription │
//! └───────────┘              │  (snapshot)  │ ─────────────────▶ │ Subscription │
//!                            └──────────────┘                    └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Snapshot fan-out:** membership is copy-on-write, so a publish sees
//!   either the old or the new subscriber set, never a torn one.
//! - **Per-pair ordering:** one publisher's messages reach each subscriber in
//!   publish order.
//! - **Backpressure:** a full queue suspends the publisher; nothing is dropped
//!   unless the caller's cancellation token fires first.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod broker;
pub mod error;
pub mod message;
pub mod subscription;
pub mod topic;

pub use broker::Broker;
pub use error::BusError;
pub use message::Message;
pub use subscription::Subscription;
pub use topic::{PublishReport, Topic, UndeliveredReason};

/// Messages buffered per subscriber before the publisher is suspended.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_QUEUE_CAPACITY, 1000);
    }
}
