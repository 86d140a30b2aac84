//! # Error Types
//!
//! Build errors abort the whole graph build. Render, format and outlet errors
//! are recoverable: they are recorded on trace records and logged, and never
//! stop a running task.

use krill_types::EntityKind;
use thiserror::Error;

/// Fatal errors while turning a configuration into a live graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Name already taken by an entity of any kind.
    #[error("Duplicate name '{name}': already registered as {existing}, cannot register {attempted}")]
    DuplicateName {
        name: String,
        existing: EntityKind,
        attempted: EntityKind,
    },

    /// A cross-reference names nothing.
    #[error(
        "Unresolved reference: {referenced_by_kind} '{referenced_by}' field '{field}' names unknown {kind} '{name}'"
    )]
    UnresolvedReference {
        kind: EntityKind,
        name: String,
        referenced_by_kind: EntityKind,
        referenced_by: String,
        field: &'static str,
    },

    /// A cross-reference names an entity of the wrong kind.
    #[error(
        "Kind mismatch: {referenced_by_kind} '{referenced_by}' field '{field}' expects {expected} '{name}', found {found}"
    )]
    KindMismatch {
        name: String,
        expected: EntityKind,
        found: EntityKind,
        referenced_by_kind: EntityKind,
        referenced_by: String,
        field: &'static str,
    },

    /// Field values are inconsistent or out of range.
    #[error("Invalid {kind} '{name}': {reason}")]
    InvalidSpec {
        kind: EntityKind,
        name: String,
        reason: String,
    },
}

/// Directory lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Name '{name}' already registered as {existing}")]
    DuplicateName {
        name: String,
        existing: EntityKind,
        attempted: EntityKind,
    },

    #[error("No entity named '{name}'")]
    NotFound { name: String },

    #[error("Entity '{name}' is a {found}, expected {expected}")]
    KindMismatch {
        name: String,
        expected: EntityKind,
        found: EntityKind,
    },

    /// The handle does not hold the requested Rust type.
    #[error("Entity '{name}' of kind {kind} has an unexpected handle type")]
    HandleType { name: String, kind: EntityKind },
}

/// Template evaluation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Unknown placeholder '${{{0}}}'")]
    UnknownPlaceholder(String),

    #[error("Unterminated placeholder in '{0}'")]
    Unterminated(String),

    #[error("Placeholder '${{{0}}}' needs a node but none is bound")]
    MissingNode(String),

    #[error("Node '{node}' has no attribute '{key}'")]
    MissingAttribute { node: String, key: String },
}

/// Encoding and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Formatter '{formatter}' failed to encode: {reason}")]
    Encode { formatter: String, reason: String },

    #[error("Formatter '{formatter}' failed to decode: {reason}")]
    Decode { formatter: String, reason: String },
}

/// Sink delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutletError {
    #[error("Outlet '{outlet}' failed to forward: {reason}")]
    Forward { outlet: String, reason: String },

    #[error("Outlet '{outlet}' rejected payload: {reason}")]
    Rejected { outlet: String, reason: String },
}

/// Publish-side pipeline failure, recorded as a failed trace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Subscriber-side pipeline failure, recorded against the delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Outlet(#[from] OutletError),
}

/// A wait ended because the cancellation token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cancelled")]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_reference_message() {
        let err = BuildError::UnresolvedReference {
            kind: EntityKind::Topic,
            name: "t9".into(),
            referenced_by_kind: EntityKind::Publisher,
            referenced_by: "p1".into(),
            field: "topic",
        };
        assert_eq!(
            err.to_string(),
            "Unresolved reference: publisher 'p1' field 'topic' names unknown topic 't9'"
        );
    }

    #[test]
    fn test_render_error_message() {
        assert_eq!(
            RenderError::UnknownPlaceholder("nope".into()).to_string(),
            "Unknown placeholder '${nope}'"
        );
    }

    #[test]
    fn test_publish_error_is_transparent() {
        let err: PublishError = RenderError::MissingAttribute {
            node: "n1".into(),
            key: "model".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Node 'n1' has no attribute 'model'");
    }
}
