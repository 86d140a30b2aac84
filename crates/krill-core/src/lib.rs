//! # Krill Core
//!
//! The simulation engine: a registry-backed graph builder and the
//! publish/subscribe runtime that drives the built graph.
//!
//! ## Build
//!
//! A [`SimulationConfig`](krill_types::SimulationConfig) names sixteen kinds of
//! entity that reference each other by name. [`Builder::parse`] creates them
//! in dependency order through one [`EntityService`](services::EntityService)
//! per kind, resolving every reference through the shared [`Registry`]. The
//! build is all-or-nothing.
//!
//! ## Run
//!
//! ```text
//! Publisher ─► Limiter ─► Renderer ─► Formatter ─► Topic ─┬─► Subscriber ─► Outlet
//!                                                         └─► Subscriber ─► Outlet
//!              Tracer: begin_trace ... record_delivery / record_delivery_failure
//!              Observer ─► Provider (prometheus)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use krill_core::{Builder, Services, Stores};
//!
//! let stores = Stores::new();
//! let builder = Builder::new(Services::new(stores, prometheus::Registry::new()));
//! let simulation = builder.parse(&document.simulation)?;
//! let summary = simulation.run(shutdown_token).await;
//! ```

pub mod builder;
pub mod error;
pub mod registry;
pub mod services;
pub mod simulation;
pub mod store;

pub use builder::{Builder, Services};
pub use error::{
    BuildError, Cancelled, DeliveryError, FormatError, OutletError, PublishError, RegistryError,
    RenderError,
};
pub use registry::{Entity, Handle, Registry, RegistryEntry};
pub use services::Lifecycle;
pub use simulation::{Simulation, SimulationSummary};
pub use store::{Store, Stores};
