//! # Error Types
//!
//! Errors raised while reading and checking a configuration document.

use thiserror::Error;

use crate::kind::EntityKind;

/// Errors that can occur before the graph is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Document could not be deserialized.
    #[error("Config parse error: {0}")]
    Parse(String),

    /// A spec was declared with a blank name.
    #[error("Empty name in {0} spec")]
    EmptyName(EntityKind),

    /// A field value can never be valid.
    #[error("Invalid {kind} '{name}': {reason}")]
    Invalid {
        kind: EntityKind,
        name: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(kind: EntityKind, name: &str, reason: &str) -> Self {
        Self::Invalid {
            kind,
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
