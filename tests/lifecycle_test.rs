//! Integration tests for lifecycle rules of the diagnostics layer.

use plasma_daq::config::{ConfigStore, RunConfig};
use plasma_daq::hardware::mock::{MockHardwareFactory, PlasmaModel};
use plasma_daq::lifecycle::{Configurable, Lifecycle};
use plasma_daq::probe::ProbeKind;
use plasma_daq::report::{LogBuffer, Reporter};
use plasma_daq::{DiagnosticsLayer, ProbeError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn create_layer(reporter: Reporter) -> DiagnosticsLayer {
    let settings: HashMap<String, Value> = [
        ("kind", json!("triple_langmuir")),
        ("relays", json!(["do0"])),
        ("amplifier", json!("ao0")),
        ("shunt_resistance", json!(50.0)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let store = ConfigStore::new();
    store.insert_probe("tlp-1", settings);

    let factory = MockHardwareFactory::new(ProbeKind::TripleLangmuir, PlasmaModel::default())
        .with_shunt_resistance(50.0);
    DiagnosticsLayer::new(Arc::new(factory), Arc::new(store), reporter)
        .expect("Failed to create diagnostics layer")
}

fn run_config() -> RunConfig {
    RunConfig::new("tlp-1")
        .with_settle_delay(Duration::from_millis(10))
        .with_queue_poll(Duration::from_millis(20))
        .with_join_timeout(Duration::from_secs(5))
}

#[test]
fn test_double_setup_leaves_state_unchanged() {
    let mut layer = create_layer(Reporter::Silent);
    layer.setup(&run_config()).unwrap();
    assert_eq!(layer.state_name(), "armed");

    let err = layer.setup(&run_config()).unwrap_err();
    assert!(err.is_lifecycle(), "{err}");
    assert_eq!(layer.state_name(), "armed");
    assert!(!layer.flags().status.operating.is_set());
}

#[test]
fn test_start_before_setup_rejected() {
    let mut layer = create_layer(Reporter::Silent);
    let err = layer.start().unwrap_err();
    assert!(err.is_lifecycle());
    assert!(err.to_string().contains("idle"), "{err}");
}

#[test]
fn test_double_stop_rejected() {
    let mut layer = create_layer(Reporter::Silent);
    layer.setup(&run_config().with_max_samples(2)).unwrap();
    layer.start().unwrap();
    let summary = layer.stop().unwrap();
    assert_eq!(summary.records as u64, summary.samples_produced);

    assert!(layer.stop().unwrap_err().is_lifecycle());
    assert!(layer.try_next_result().is_some());
    assert!(layer.try_next_result().is_none());
}

#[test]
fn test_operation_reusable_after_stop() {
    let mut layer = create_layer(Reporter::Silent);
    for _ in 0..2 {
        layer.setup(&run_config().with_max_samples(3)).unwrap();
        layer.start().unwrap();
        while !layer.operation().is_probe_finished() {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(layer.stop().unwrap().records, 3);
    }
    assert_eq!(layer.stats().runs_completed, 2);
    assert_eq!(layer.stats().records_aggregated, 6);
}

#[test]
fn test_unknown_probe_is_configuration_error() {
    let mut layer = create_layer(Reporter::Silent);
    let err = layer.setup(&RunConfig::new("nope")).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(layer.state_name(), "idle");
}

#[test]
fn test_invalid_run_config_rejected() {
    let mut layer = create_layer(Reporter::Silent);
    let err = layer
        .setup(&run_config().with_queue_capacity(0))
        .unwrap_err();
    assert!(matches!(err, ProbeError::Configuration(_)));
}

#[test]
fn test_shutdown_while_running_is_prompt_and_idempotent() {
    let buffer = LogBuffer::new();
    let mut layer = create_layer(Reporter::Captured(buffer.clone()));
    layer.setup(&run_config()).unwrap();
    layer.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    layer.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(layer.state_name(), "terminated");
    assert!(layer.flags().command.is_shutdown());
    assert!(!layer.flags().status.operating.is_set());
    assert!(layer.try_next_result().is_some());
    assert!(buffer.contains("Relays disabled"));

    layer.shutdown().unwrap();
    let err = layer.setup(&run_config()).unwrap_err();
    assert!(err.is_lifecycle());
}

#[test]
fn test_shutdown_before_setup() {
    let mut layer = create_layer(Reporter::Silent);
    layer.shutdown().unwrap();
    assert_eq!(layer.state_name(), "terminated");
    assert!(layer.try_next_result().is_none());
}

#[test]
fn test_shutdown_cuts_run_short() {
    let mut layer = create_layer(Reporter::Silent);
    let flags = layer.flags().clone();
    let trigger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        flags.command.request_shutdown();
    });

    let started = Instant::now();
    let outcome = layer
        .run_for(&run_config(), Duration::from_secs(30))
        .expect("Run produced no outcome");
    trigger.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(outcome.status.is_completed());
    assert_eq!(outcome.records.len() as u64, layer.stats().samples_produced);
}
