//! # Krill Types
//!
//! Types shared by every Krill crate.
//!
//! - [`EntityKind`]: the sixteen kinds of named entity a simulation is built from.
//! - [`ConfigDocument`]: the declarative document describing a simulation,
//!   one list of named specs per kind, cross-referencing each other by name.
//!
//! The document is format-agnostic: the same types deserialize from YAML or JSON.

pub mod config;
pub mod errors;
pub mod kind;

pub use config::*;
pub use errors::ConfigError;
pub use kind::EntityKind;
