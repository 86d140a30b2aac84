//! Shared fixtures for the graph and pipeline tests.

#![allow(dead_code)]

use krill_core::{BuildError, Builder, Services, Simulation, SimulationSummary, Stores};
use krill_types::{ConfigDocument, SimulationConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One plant with two nodes, a broker with two topics, one client, two
/// formatters, a tracer and a provider. Tests append the rest.
pub const BASE: &str = r#"
simulation:
  sites:
    - name: plant
  nodes:
    - name: n1
      site: plant
      attributes:
        temp: 21.5
    - name: n2
      site: plant
  edges:
    - name: e1
      source: n1
      destination: n2
  brokers:
    - name: b1
  topics:
    - name: telemetry
      broker: b1
    - name: relay
      broker: b1
  clients:
    - name: c1
      site: plant
      broker: b1
  formatters:
    - name: json
      type: json
    - name: text
      type: text
  tracers:
    - name: tr
  providers:
    - name: prom
      namespace: fleet
"#;

pub fn config(rest: &str) -> SimulationConfig {
    ConfigDocument::from_yaml_str(&format!("{BASE}{rest}"))
        .expect("test config parses")
        .simulation
}

pub fn builder(metrics: &prometheus::Registry) -> Builder {
    Builder::new(Services::new(Stores::new(), metrics.clone()))
}

pub struct Harness {
    pub simulation: Simulation,
    pub metrics: prometheus::Registry,
}

pub fn build(rest: &str) -> Result<Harness, BuildError> {
    let metrics = prometheus::Registry::new();
    let simulation = builder(&metrics).parse(&config(rest))?;
    Ok(Harness {
        simulation,
        metrics,
    })
}

/// Run for `duration` of (paused) time, then shut down.
pub async fn run_for(simulation: &Simulation, duration: Duration) -> SimulationSummary {
    let shutdown = CancellationToken::new();
    let (summary, ()) = tokio::join!(simulation.run(shutdown.clone()), async {
        tokio::time::sleep(duration).await;
        shutdown.cancel();
    });
    summary
}

/// A renderer, a collecting outlet, one subscriber and one publisher on
/// `telemetry`.
pub const PIPELINE: &str = r#"
  renderers:
    - name: r1
      formatter: json
      node: n1
      template:
        device: "${node}"
        site: "${site}"
        seq: "${seq}"
        temp: "${attr.temp}"
  outlets:
    - name: sink
      formatter: json
      type: collect
  subscribers:
    - name: s1
      client: c1
      topic: telemetry
      outlet: sink
      tracer: tr
  publishers:
    - name: p1
      client: c1
      topic: telemetry
      renderer: r1
      tracer: tr
      interval: 100ms
"#;

pub fn shared(harness: Harness) -> (Arc<Simulation>, prometheus::Registry) {
    (Arc::new(harness.simulation), harness.metrics)
}
