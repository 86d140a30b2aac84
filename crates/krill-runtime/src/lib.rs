//! # Krill Runtime
//!
//! The pieces behind the `krill` binary, exposed as a library for testing.
//!
//! - [`cli`]: command line arguments
//! - [`loader`]: reading and checking the configuration document
//! - [`server`]: the axum `/metrics` endpoint
//! - [`app`]: build, serve, run, report

pub mod app;
pub mod cli;
pub mod loader;
pub mod server;

const BANNER: &str = r"
  _        _ _ _
 | | ___ _(_) | |
 | |/ / '_| | | |
 |   <| | | | | |
 |_|\_\_| |_|_|_|
";

/// Startup banner with the crate version.
#[must_use]
pub fn banner() -> String {
    format!("{BANNER}  IoT fleet simulator v{}\n", env!("CARGO_PKG_VERSION"))
}
