//! # Pipeline Tests
//!
//! End-to-end runs on paused time: publishers through topics to outlets, with
//! tracing, rate limiting, backpressure and staged shutdown.

mod common;

use common::{build, run_for, shared, PIPELINE};
use krill_bus::UndeliveredReason;
use krill_core::services::DeliveryOutcome;
use krill_core::Lifecycle;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// END TO END
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ten_messages_per_second_all_delivered() {
    let harness = build(PIPELINE).unwrap();
    let sim = &harness.simulation;

    let summary = run_for(sim, Duration::from_secs(1)).await;
    let traces = summary.traces["tr"];

    assert!((9..=11).contains(&traces.started), "started {}", traces.started);
    assert_eq!(traces.delivered, traces.started);
    assert_eq!(traces.failed, 0);
    assert_eq!(traces.publish_failures, 0);
    assert_eq!(summary.published, traces.started);
    assert_eq!(summary.received, traces.started);

    let items = sim.outlet("sink").unwrap().collector().unwrap().items();
    assert_eq!(items.len() as u64, traces.started);
    assert_eq!(
        items[0].payload,
        json!({"device": "n1", "site": "plant", "seq": 0, "temp": 21.5})
    );

    let client = sim.stores().clients.get("c1").unwrap().stats();
    assert_eq!(client.messages_sent, traces.started);
    assert_eq!(client.messages_received, traces.started);
    assert_eq!(client.bytes_sent, client.bytes_received);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_caps_rate() {
    let harness = build(&format!(
        "{}{}",
        PIPELINE.replace("interval: 100ms", "interval: 100ms\n      limiter: l1"),
        r#"
  limiters:
    - name: l1
      rate: 1
      burst: 1
"#
    ))
    .unwrap();

    let summary = run_for(&harness.simulation, Duration::from_secs(3)).await;
    assert!(
        (3..=4).contains(&summary.published),
        "published {}",
        summary.published
    );
    assert_eq!(summary.traces["tr"].delivered, summary.published);
}

#[tokio::test(start_paused = true)]
async fn test_near_zero_rate_publishes_burst_then_stops_cleanly() {
    let harness = build(&format!(
        "{}{}",
        PIPELINE.replace("interval: 100ms", "interval: 100ms\n      limiter: l1"),
        r#"
  limiters:
    - name: l1
      rate: 1.0e-30
      burst: 1
"#
    ))
    .unwrap();
    let sim = &harness.simulation;

    let summary = run_for(sim, Duration::from_secs(1)).await;
    assert_eq!(summary.published, 1);
    assert_eq!(summary.publish_failures, 0);
    assert_eq!(sim.publisher("p1").unwrap().lifecycle(), Lifecycle::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_per_publisher_order() {
    let harness = build(
        r#"
  renderers:
    - name: r1
      formatter: json
      template:
        from: "${publisher}"
        seq: "${seq}"
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
      queue_capacity: 4
  publishers:
    - name: fast
      client: c1
      topic: telemetry
      renderer: r1
      tracer: tr
      interval: 10ms
    - name: slow
      client: c1
      topic: telemetry
      renderer: r1
      tracer: tr
      interval: 35ms
"#,
    )
    .unwrap();
    let sim = &harness.simulation;
    run_for(sim, Duration::from_millis(500)).await;

    let items = sim.outlet("sink").unwrap().collector().unwrap().items();
    for publisher in ["fast", "slow"] {
        let seqs: Vec<u64> = items
            .iter()
            .filter(|c| c.publisher == publisher)
            .map(|c| c.sequence)
            .collect();
        assert!(!seqs.is_empty());
        let expected: Vec<u64> = (0..seqs.len() as u64).collect();
        assert_eq!(seqs, expected, "{publisher} out of order");

        for c in items.iter().filter(|c| c.publisher == publisher) {
            assert_eq!(c.payload["seq"], json!(c.sequence));
            assert_eq!(c.payload["from"], json!(publisher));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_forward_keeps_trace() {
    let harness = build(
        r#"
  renderers:
    - name: r1
      formatter: json
      template:
        seq: "${seq}"
  outlets:
    - name: relay-out
      formatter: json
      type: forward
      topic: relay
    - name: sink
      formatter: json
      type: collect
  subscribers:
    - name: s1
      client: c1
      topic: telemetry
      outlet: relay-out
      tracer: tr
    - name: s2
      client: c1
      topic: relay
      outlet: sink
      tracer: tr
  publishers:
    - name: p1
      client: c1
      topic: telemetry
      renderer: r1
      tracer: tr
      interval: 100ms
"#,
    )
    .unwrap();
    let sim = &harness.simulation;
    run_for(sim, Duration::from_millis(450)).await;

    let tracer = sim.tracer("tr").unwrap();
    let items = sim.outlet("sink").unwrap().collector().unwrap().items();
    assert!(!items.is_empty());
    for item in &items {
        assert_eq!(item.publisher, "relay-out");
        let record = tracer.record(item.trace_id).unwrap();
        assert_eq!(record.publisher, "p1");
        assert!(matches!(
            record.deliveries["s1"],
            DeliveryOutcome::Delivered { .. }
        ));
        assert!(matches!(
            record.deliveries["s2"],
            DeliveryOutcome::Delivered { .. }
        ));
    }
}

// =============================================================================
// FAILURE CONTAINMENT
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_render_failure_recorded_and_schedule_continues() {
    // p1 renders a missing attribute, p2 is healthy.
    let config = PIPELINE
        .replace("${attr.temp}", "${attr.humidity}")
        .replace(
            "  outlets:",
            r#"    - name: r2
      formatter: json
      template:
        seq: "${seq}"
  outlets:"#,
        );
    let harness = build(&format!(
        "{config}{}",
        r#"    - name: p2
      client: c1
      topic: telemetry
      renderer: r2
      tracer: tr
      interval: 100ms
"#
    ))
    .unwrap();
    let sim = &harness.simulation;

    let summary = run_for(sim, Duration::from_millis(500)).await;
    let traces = summary.traces["tr"];

    let p1 = sim.publisher("p1").unwrap();
    let p2 = sim.publisher("p2").unwrap();
    assert!(p1.failures() >= 5, "failures {}", p1.failures());
    assert_eq!(p1.published(), 0);
    assert_eq!(p1.lifecycle(), Lifecycle::Stopped);
    assert_eq!(p2.failures(), 0);
    assert!(p2.published() >= 5);

    assert_eq!(traces.publish_failures, p1.failures());
    assert_eq!(traces.started, p1.failures() + p2.published());
    assert_eq!(traces.delivered, p2.published());

    let tracer = sim.tracer("tr").unwrap();
    let failed: Vec<_> = tracer.records().into_iter().filter(|r| r.is_failed()).collect();
    assert_eq!(failed.len() as u64, p1.failures());
    assert!(failed.iter().all(|r| r.publisher == "p1"));
}

#[tokio::test(start_paused = true)]
async fn test_decode_failure_recorded_per_delivery() {
    let harness = build(&PIPELINE.replace(
        "    - name: sink\n      formatter: json",
        "    - name: sink\n      formatter: text",
    ))
    .unwrap();
    let sim = &harness.simulation;

    let summary = run_for(sim, Duration::from_millis(300)).await;
    let traces = summary.traces["tr"];

    assert!(summary.published > 0);
    assert_eq!(summary.delivery_failures, summary.published);
    assert_eq!(traces.failed, traces.started);
    assert_eq!(traces.delivered, 0);
    assert!(sim.outlet("sink").unwrap().collector().unwrap().is_empty());
}

// =============================================================================
// BACKPRESSURE AND SHUTDOWN
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_queue_suspends_publisher() {
    let harness = build(&PIPELINE.replace("tracer: tr\n  publishers", "tracer: tr\n      queue_capacity: 2\n  publishers"))
        .unwrap();
    let (sim, _) = shared(harness);
    let publisher = sim.publisher("p1").unwrap();
    let cancel = CancellationToken::new();

    // Nobody consumes: two fit, the third waits.
    assert!(publisher.emit(&cancel).await.unwrap().is_complete());
    assert!(publisher.emit(&cancel).await.unwrap().is_complete());

    let blocked = tokio::spawn({
        let publisher = Arc::clone(&publisher);
        let cancel = cancel.clone();
        async move { publisher.emit(&cancel).await }
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!blocked.is_finished());

    cancel.cancel();
    let report = blocked.await.unwrap().unwrap();
    assert!(report.enqueued.is_empty());
    assert_eq!(report.undelivered.len(), 1);
    assert_eq!(&*report.undelivered[0].0, "s1");
    assert_eq!(report.undelivered[0].1, UndeliveredReason::Cancelled);

    let summary = sim.tracer("tr").unwrap().summary();
    assert_eq!(summary.started, 3);
    assert_eq!(summary.failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_semantics() {
    let harness = build(PIPELINE).unwrap();
    let sim = &harness.simulation;
    let publisher = sim.publisher("p1").unwrap();
    let subscriber = sim.subscriber("s1").unwrap();
    assert_eq!(publisher.lifecycle(), Lifecycle::Created);
    assert_eq!(subscriber.lifecycle(), Lifecycle::Created);

    let summary = run_for(sim, Duration::from_millis(550)).await;

    assert_eq!(publisher.lifecycle(), Lifecycle::Stopped);
    assert_eq!(subscriber.lifecycle(), Lifecycle::Stopped);
    assert_eq!(sim.stores().topics.get("telemetry").unwrap().subscriber_count(), 0);

    // Nothing moves after shutdown, and a stopped graph cannot restart.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(publisher.published(), summary.published);
    let again = run_for(sim, Duration::from_millis(500)).await;
    assert_eq!(again.published, summary.published);
    assert_eq!(again.received, summary.received);
}

// =============================================================================
// OBSERVER
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_observer_exports_metrics() {
    let harness = build(&format!(
        "{PIPELINE}{}",
        r#"
  observers:
    - name: o1
      provider: prom
      interval: 200ms
"#
    ))
    .unwrap();
    let sim = &harness.simulation;

    let summary = run_for(sim, Duration::from_secs(1)).await;
    let observer = sim.observer("o1").unwrap();
    assert!(observer.samples() >= 5, "samples {}", observer.samples());

    // The final sample runs after publishers and subscribers stopped.
    let last = observer.last_sample().unwrap();
    assert_eq!(last.publishers_running, 0);
    assert_eq!(last.subscribers_running, 0);
    assert_eq!(last.traces["tr"], summary.traces["tr"]);

    let families = harness.metrics.gather();
    let value = |name: &str| {
        families
            .iter()
            .find(|f| f.get_name() == name)
            .map(|f| {
                let m = &f.get_metric()[0];
                if f.get_field_type() == prometheus::proto::MetricType::COUNTER {
                    m.get_counter().get_value()
                } else {
                    m.get_gauge().get_value()
                }
            })
            .unwrap_or_else(|| panic!("{name} not exported"))
    };
    assert_eq!(value("fleet_traces_total"), summary.traces["tr"].started as f64);
    assert_eq!(value("fleet_deliveries_total"), summary.traces["tr"].delivered as f64);
    assert_eq!(value("fleet_delivery_failures_total"), 0.0);
    assert_eq!(value("fleet_delivery_success_ratio"), 1.0);

    let text = krill_telemetry::encode_metrics(&harness.metrics).unwrap();
    assert!(text.contains("fleet_delivery_latency_seconds_count"));
    assert!(text.contains(r#"kind="publisher""#));
    assert!(text.contains(r#"observer="o1""#));
    assert!(text.contains(r#"provider="prom""#));
    assert!(text.contains("fleet_client_messages"));
}
