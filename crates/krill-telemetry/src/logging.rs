//! Structured logging setup.
//!
//! Every component logs through `tracing` with a `service` field naming the
//! entity kind, so a filter on `service` isolates one part of the simulation.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Install the global subscriber.
///
/// Fails if the filter directive is invalid or a subscriber is already set.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Config(format!("invalid log filter: {e}")))?;

    if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    tracing::debug!(
        service = %config.service_name,
        json_logs = config.json_logs,
        level = %config.log_level,
        "Logging initialized"
    );
    Ok(())
}

/// Log with the `service` field set.
///
/// ```rust,ignore
/// log_event!(info, "publisher", "Publisher started", name = %name, interval_ms = 100);
/// ```
#[macro_export]
macro_rules! log_event {
    (info, $service:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            service = $service,
            $($($field)*,)?
            $msg
        )
    };

    (warn, $service:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(
            service = $service,
            $($($field)*,)?
            $msg
        )
    };

    (error, $service:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(
            service = $service,
            $($($field)*,)?
            $msg
        )
    };

    (debug, $service:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(
            service = $service,
            $($($field)*,)?
            $msg
        )
    };

    (trace, $service:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::trace!(
            service = $service,
            $($($field)*,)?
            $msg
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = TelemetryConfig {
            log_level: "krill=loud".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(matches!(init_logging(&config), Err(TelemetryError::Config(_))));
    }

    #[test]
    fn test_log_event_expands() {
        let name = "p1";
        crate::log_event!(info, "publisher", "Publisher started", name = %name, interval_ms = 100);
        crate::log_event!(debug, "topic", "No fields");
    }
}
