//! Integration tests for the structured log trail of a run.
//!
//! `traced_test` captures events emitted inside the test's own span, so only the
//! messages logged on the calling thread (setup, start, stop) are asserted here.

use plasma_daq::config::{ConfigStore, RunConfig};
use plasma_daq::hardware::mock::{MockHardwareFactory, PlasmaModel};
use plasma_daq::lifecycle::{Configurable, Lifecycle};
use plasma_daq::probe::ProbeKind;
use plasma_daq::report::Reporter;
use plasma_daq::DiagnosticsLayer;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

fn create_layer() -> (DiagnosticsLayer, MockHardwareFactory) {
    let settings: HashMap<String, Value> = [
        ("kind", json!("single_langmuir")),
        ("relays", json!(["do0"])),
        ("amplifier", json!("ao0")),
        ("shunt_resistance", json!(100.0)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let store = ConfigStore::new();
    store.insert_probe("slp-1", settings);
    let factory = MockHardwareFactory::new(ProbeKind::SingleLangmuir, PlasmaModel::default());
    let layer = DiagnosticsLayer::new(Arc::new(factory.clone()), Arc::new(store), Reporter::Tracing)
        .expect("Failed to create diagnostics layer");
    (layer, factory)
}

fn wait_for_probe(layer: &DiagnosticsLayer) {
    while !layer.operation().is_probe_finished() {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
#[traced_test]
fn test_run_logs_lifecycle() {
    let (mut layer, _factory) = create_layer();
    let run = RunConfig::new("slp-1")
        .with_settle_delay(Duration::from_millis(10))
        .with_queue_poll(Duration::from_millis(20))
        .with_max_samples(2);

    layer.setup(&run).unwrap();
    assert!(logs_contain("Probe operation armed"));
    assert!(logs_contain("Probe armed"));

    layer.start().unwrap();
    assert!(logs_contain("Diagnostics started"));

    wait_for_probe(&layer);
    layer.stop().unwrap();
    assert!(logs_contain("Diagnostics stopped"));
    assert!(!logs_contain("Run failed"));
}

#[test]
#[traced_test]
fn test_failed_run_is_logged_as_error() {
    let (mut layer, factory) = create_layer();
    factory.fail_reads_after(0);

    let run = RunConfig::new("slp-1").with_settle_delay(Duration::from_millis(10));
    layer.setup(&run).unwrap();
    layer.start().unwrap();
    wait_for_probe(&layer);

    assert!(layer.stop().is_err());
    assert!(logs_contain("Run failed"));
}
