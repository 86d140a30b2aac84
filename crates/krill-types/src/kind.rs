//! # Entity Kinds
//!
//! Every named object in a simulation belongs to exactly one kind.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a registry-tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Broker,
    Client,
    Edge,
    Formatter,
    Limiter,
    Node,
    Observer,
    Outlet,
    Provider,
    Publisher,
    Registry,
    Renderer,
    Site,
    Subscriber,
    Topic,
    Tracer,
}

impl EntityKind {
    /// Get the lowercase kind name used in logs, errors and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Broker => "broker",
            Self::Client => "client",
            Self::Edge => "edge",
            Self::Formatter => "formatter",
            Self::Limiter => "limiter",
            Self::Node => "node",
            Self::Observer => "observer",
            Self::Outlet => "outlet",
            Self::Provider => "provider",
            Self::Publisher => "publisher",
            Self::Registry => "registry",
            Self::Renderer => "renderer",
            Self::Site => "site",
            Self::Subscriber => "subscriber",
            Self::Topic => "topic",
            Self::Tracer => "tracer",
        }
    }

    /// Get all entity kinds.
    #[must_use]
    pub fn all() -> [EntityKind; 16] {
        [
            Self::Broker,
            Self::Client,
            Self::Edge,
            Self::Formatter,
            Self::Limiter,
            Self::Node,
            Self::Observer,
            Self::Outlet,
            Self::Provider,
            Self::Publisher,
            Self::Registry,
            Self::Renderer,
            Self::Site,
            Self::Subscriber,
            Self::Topic,
            Self::Tracer,
        ]
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
