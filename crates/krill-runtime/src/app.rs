//! # Application
//!
//! Wires a loaded document into a running simulation:
//!
//! 1. build the graph (nothing runs if this fails)
//! 2. bind and serve `/metrics`
//! 3. run until Ctrl-C, the optional deadline, or the caller's token
//! 4. stop the server and return the summary

use anyhow::{Context, Result};
use krill_core::{Builder, Services, SimulationSummary, Stores};
use krill_telemetry::log_event;
use krill_types::ConfigDocument;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::server;

const SERVICE: &str = "krill";

/// Runtime settings that do not come from the document itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub metrics_port: u16,
    pub duration: Option<Duration>,
}

/// Build and run one simulation to completion.
pub async fn run(
    document: &ConfigDocument,
    options: &RunOptions,
    shutdown: CancellationToken,
) -> Result<SimulationSummary> {
    let metrics = prometheus::Registry::new();
    let builder = Builder::new(Services::new(Stores::new(), metrics.clone()));
    let simulation = builder
        .parse(&document.simulation)
        .context("Failed to build simulation graph")?;

    let listener = server::bind(options.metrics_port)
        .await
        .with_context(|| format!("Failed to bind metrics port {}", options.metrics_port))?;
    let server_stop = CancellationToken::new();
    let server = tokio::spawn(server::serve(listener, metrics, server_stop.clone()));

    let stopper = tokio::spawn(stop_on_signal(shutdown.clone(), options.duration));
    let summary = simulation.run(shutdown.clone()).await;
    stopper.abort();

    server_stop.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log_event!(warn, SERVICE, "Metrics endpoint failed", error = %e),
        Err(e) => log_event!(warn, SERVICE, "Metrics endpoint task ended abnormally", error = %e),
    }
    Ok(summary)
}

/// Cancel `shutdown` on Ctrl-C or once `duration` has elapsed.
async fn stop_on_signal(shutdown: CancellationToken, duration: Option<Duration>) {
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        () = shutdown.cancelled() => return,
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => log_event!(info, SERVICE, "Interrupted"),
            Err(e) => {
                log_event!(error, SERVICE, "Failed to listen for Ctrl-C", error = %e);
                return;
            }
        },
        () = deadline => log_event!(info, SERVICE, "Run duration reached"),
    }
    shutdown.cancel();
}

/// Log the end-of-run report.
pub fn report(summary: &SimulationSummary) {
    log_event!(
        info,
        SERVICE,
        "Simulation summary",
        entities = summary.entities,
        publishers = summary.publishers,
        subscribers = summary.subscribers,
        published = summary.published,
        received = summary.received,
        publish_failures = summary.publish_failures,
        delivery_failures = summary.delivery_failures
    );
    for (tracer, traces) in &summary.traces {
        log_event!(
            info,
            SERVICE,
            "Trace summary",
            tracer = %tracer,
            started = traces.started,
            delivered = traces.delivered,
            failed = traces.failed,
            evicted = traces.evicted,
            mean_latency_us = traces.mean_latency.map_or(0, |d| d.as_micros() as u64),
            max_latency_us = traces.max_latency.map_or(0, |d| d.as_micros() as u64)
        );
    }
}
