//! # Krill Telemetry
//!
//! Logging and metrics plumbing shared by the simulation core and the runtime
//! binary.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, plain or JSON
//! - **Metrics**: [`MetricsProvider`], a namespaced, sealable view onto a
//!   shared `prometheus::Registry`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use krill_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::resolve("info", 2112);
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `KRILL_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `KRILL_JSON_LOGS` | `false` | JSON formatted logs |
//! | `KRILL_METRICS_PORT` | `2112` | Port serving `/metrics` |

mod config;
mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, DEFAULT_LOG_LEVEL, DEFAULT_METRICS_PORT};
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, latency_buckets, CounterHandle, GaugeHandle, GaugeVecHandle, HistogramHandle,
    MetricsProvider, ProviderError, ScopedProvider, DEFAULT_NAMESPACE,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to encode Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
