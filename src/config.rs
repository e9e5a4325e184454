//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `PLASMA_DAQ_`, nested keys separated by
//!    a double underscore (e.g. `PLASMA_DAQ_ENGINE__QUEUE_CAPACITY=16`)
//!
//! The loaded [`DaqConfig`] feeds two consumers:
//!
//! - [`ConfigStore`], the default [`ConfigManager`], which exposes the per-probe
//!   settings tables key by key. Probe threads read it only at setup time.
//! - [`RunConfig`], the operator-facing choices for one diagnostics run (queue size,
//!   backpressure, timeouts, clock pacing).
//!
//! # Example
//! ```no_run
//! use plasma_daq::config::{ConfigStore, DaqConfig, RunConfig};
//!
//! let config = DaqConfig::load_from("config/plasma_daq.toml")?;
//! config.validate()?;
//! let store = ConfigStore::from_config(&config)?;
//! let run = RunConfig::from_engine(&config.engine, "slp-1");
//! # Ok::<(), plasma_daq::ProbeError>(())
//! ```

use crate::clock::period_for;
use crate::container::SynchronizedContainer;
use crate::error::{ProbeError, Result};
use crate::probe::queue::BackpressurePolicy;
use crate::probe::ProbeKind;
use crate::telemetry::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Acquisition engine settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Probe definitions
    #[serde(default)]
    pub probes: Vec<ProbeDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// How the hand-off queue behaves when full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// Discard the new sample (non-blocking put)
    #[default]
    DropNewest,
    /// Block the producer for up to `block_timeout_ms`, then discard
    Block,
}

/// Acquisition engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hand-off queue capacity in samples
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Backpressure policy when the queue is full
    #[serde(default)]
    pub backpressure: BackpressureMode,
    /// Producer block bound for [`BackpressureMode::Block`]
    #[serde(default = "default_block_timeout")]
    pub block_timeout_ms: u64,
    /// Consumer poll bound on an empty queue
    #[serde(default = "default_queue_poll")]
    pub queue_poll_ms: u64,
    /// Bound on waiting for the probe thread to finish cleanup
    #[serde(default = "default_join_timeout")]
    pub join_timeout_ms: u64,
    /// Relay settle delay after enabling and after disabling
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Optional clock pacing of the sampling loop
    #[serde(default)]
    pub sample_rate_hz: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backpressure: BackpressureMode::default(),
            block_timeout_ms: default_block_timeout(),
            queue_poll_ms: default_queue_poll(),
            join_timeout_ms: default_join_timeout(),
            settle_delay_ms: default_settle_delay(),
            sample_rate_hz: None,
        }
    }
}

/// Probe definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeDefinition {
    /// Unique probe identifier
    pub id: String,
    /// Probe type
    pub kind: ProbeKind,
    /// Whether this probe is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Probe-specific settings (wiring, gains, sweep)
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_block_timeout() -> u64 {
    100
}

fn default_queue_poll() -> u64 {
    500
}

fn default_join_timeout() -> u64 {
    15_000
}

fn default_settle_delay() -> u64 {
    3_000
}

fn default_enabled() -> bool {
    true
}

impl DaqConfig {
    /// Load configuration from a specific file path, with environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = %path.as_ref().display(), "Loading configuration");
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PLASMA_DAQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides).
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config = Figment::new().merge(Toml::string(toml_str)).extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ProbeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.engine.queue_capacity == 0 {
            return Err(ProbeError::Configuration(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        if self.engine.queue_poll_ms == 0 {
            return Err(ProbeError::Configuration(
                "queue_poll_ms must be positive".to_string(),
            ));
        }

        if let Some(rate) = self.engine.sample_rate_hz {
            period_for(rate).map_err(|e| {
                ProbeError::Configuration(format!("Invalid sample_rate_hz: {e}"))
            })?;
        }

        let mut ids = HashSet::new();
        for probe in &self.probes {
            if !ids.insert(&probe.id) {
                return Err(ProbeError::Configuration(format!(
                    "Duplicate probe ID: {}",
                    probe.id
                )));
            }
        }

        Ok(())
    }

    /// Get all enabled probes
    pub fn enabled_probes(&self) -> Vec<&ProbeDefinition> {
        self.probes.iter().filter(|probe| probe.enabled).collect()
    }
}

/// Key-level access to per-probe configuration.
///
/// Only consulted while a probe is being set up, never from the sampling loop.
pub trait ConfigManager: Send + Sync {
    /// Read one setting of one probe.
    fn get_config(&self, probe_id: &str, key: &str) -> Result<Option<Value>>;

    /// Write one setting of one probe.
    fn set_config(&self, probe_id: &str, key: &str, value: Value) -> Result<()>;

    /// Identifiers of every known probe.
    fn probe_ids(&self) -> Vec<String>;
}

/// Default [`ConfigManager`]: one [`SynchronizedContainer`] per probe.
#[derive(Debug, Default, Clone)]
pub struct ConfigStore {
    probes: Arc<RwLock<HashMap<String, Arc<SynchronizedContainer>>>>,
}

impl ConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate a store from the enabled probes of a loaded configuration.
    ///
    /// Each probe container carries a `kind` entry next to its settings.
    pub fn from_config(config: &DaqConfig) -> Result<Self> {
        let store = Self::new();
        for probe in config.enabled_probes() {
            let mut map: HashMap<String, Value> = probe
                .settings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            map.insert("kind".to_string(), serde_json::to_value(probe.kind)?);
            store.insert_probe(&probe.id, map);
            debug!(probe_id = %probe.id, kind = %probe.kind, "Registered probe configuration");
        }
        Ok(store)
    }

    /// Register (or replace) a probe's settings.
    pub fn insert_probe(&self, probe_id: &str, settings: HashMap<String, Value>) {
        self.probes.write().insert(
            probe_id.to_string(),
            Arc::new(SynchronizedContainer::from_map(&settings)),
        );
    }

    /// The container backing one probe, if registered.
    pub fn probe(&self, probe_id: &str) -> Option<Arc<SynchronizedContainer>> {
        self.probes.read().get(probe_id).cloned()
    }
}

impl ConfigManager for ConfigStore {
    fn get_config(&self, probe_id: &str, key: &str) -> Result<Option<Value>> {
        match self.probe(probe_id) {
            Some(container) => container.get(key),
            None => Err(ProbeError::Configuration(format!(
                "Unknown probe '{probe_id}'"
            ))),
        }
    }

    fn set_config(&self, probe_id: &str, key: &str, value: Value) -> Result<()> {
        match self.probe(probe_id) {
            Some(container) => {
                container.set(key, value)?;
                Ok(())
            }
            None => Err(ProbeError::Configuration(format!(
                "Unknown probe '{probe_id}'"
            ))),
        }
    }

    fn probe_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.probes.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Operator choices for one diagnostics run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Probe to run
    pub probe_id: String,
    /// Hand-off queue capacity
    pub queue_capacity: usize,
    /// Full-queue behaviour
    pub backpressure: BackpressurePolicy,
    /// Consumer poll bound on an empty queue
    pub queue_poll: Duration,
    /// Bound on waiting for the probe thread during `stop()`
    pub join_timeout: Duration,
    /// Relay settle delay
    pub settle_delay: Duration,
    /// Clock pacing; `None` samples back to back
    pub sample_rate_hz: Option<f64>,
    /// Stop sampling after this many samples (the run still needs `stop()`)
    pub max_samples: Option<u64>,
}

impl RunConfig {
    /// Defaults for `probe_id` taken from the engine section.
    pub fn from_engine(engine: &EngineConfig, probe_id: impl Into<String>) -> Self {
        let backpressure = match engine.backpressure {
            BackpressureMode::DropNewest => BackpressurePolicy::DropNewest,
            BackpressureMode::Block => BackpressurePolicy::Block {
                timeout: Duration::from_millis(engine.block_timeout_ms),
            },
        };
        Self {
            probe_id: probe_id.into(),
            queue_capacity: engine.queue_capacity,
            backpressure,
            queue_poll: Duration::from_millis(engine.queue_poll_ms),
            join_timeout: Duration::from_millis(engine.join_timeout_ms),
            settle_delay: Duration::from_millis(engine.settle_delay_ms),
            sample_rate_hz: engine.sample_rate_hz,
            max_samples: None,
        }
    }

    /// Engine defaults for `probe_id`.
    pub fn new(probe_id: impl Into<String>) -> Self {
        Self::from_engine(&EngineConfig::default(), probe_id)
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the backpressure policy.
    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }

    /// Set the relay settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the consumer poll bound.
    pub fn with_queue_poll(mut self, poll: Duration) -> Self {
        self.queue_poll = poll;
        self
    }

    /// Set the join bound used by `stop()`.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Pace sampling with a clock thread.
    pub fn with_sample_rate(mut self, rate_hz: f64) -> Self {
        self.sample_rate_hz = Some(rate_hz);
        self
    }

    /// Limit the number of samples taken.
    pub fn with_max_samples(mut self, max: u64) -> Self {
        self.max_samples = Some(max);
        self
    }

    /// Reject settings that would make the run misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(ProbeError::Configuration(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.queue_poll.is_zero() {
            return Err(ProbeError::Configuration(
                "queue_poll must be positive".to_string(),
            ));
        }
        if let Some(rate) = self.sample_rate_hz {
            period_for(rate)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [application]
        name = "Plasma DAQ Test"
        log_level = "debug"

        [engine]
        queue_capacity = 8
        backpressure = "block"
        block_timeout_ms = 50
        settle_delay_ms = 10

        [[probes]]
        id = "slp-1"
        kind = "single_langmuir"
        [probes.settings]
        relays = ["do0"]
        amplifier = "ao0"
        shunt_resistance = 100.0

        [[probes]]
        id = "tlp-1"
        kind = "triple_langmuir"
        enabled = false
    "#;

    #[test]
    fn test_parse_and_validate() {
        let config = DaqConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.application.name, "Plasma DAQ Test");
        assert_eq!(config.engine.queue_capacity, 8);
        assert_eq!(config.engine.backpressure, BackpressureMode::Block);
        assert_eq!(config.engine.queue_poll_ms, 500);
        assert_eq!(config.probes.len(), 2);
        assert_eq!(config.enabled_probes().len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = DaqConfig::from_toml_str(SAMPLE).unwrap();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let mut config = DaqConfig::from_toml_str(SAMPLE).unwrap();
        config.engine.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_probe_ids() {
        let mut config = DaqConfig::from_toml_str(SAMPLE).unwrap();
        let duplicate = config.probes[0].clone();
        config.probes.push(duplicate);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = DaqConfig::load_from(file.path()).unwrap();
        assert_eq!(config.probes[0].id, "slp-1");
    }

    #[test]
    fn test_store_exposes_enabled_probes() {
        let config = DaqConfig::from_toml_str(SAMPLE).unwrap();
        let store = ConfigStore::from_config(&config).unwrap();
        assert_eq!(store.probe_ids(), vec!["slp-1".to_string()]);
        assert_eq!(
            store.get_config("slp-1", "shunt_resistance").unwrap(),
            Some(json!(100.0))
        );
        assert_eq!(
            store.get_config("slp-1", "kind").unwrap(),
            Some(json!("single_langmuir"))
        );
        assert!(store.get_config("tlp-1", "kind").is_err());

        store
            .set_config("slp-1", "shunt_resistance", json!(50.0))
            .unwrap();
        assert_eq!(
            store.get_config("slp-1", "shunt_resistance").unwrap(),
            Some(json!(50.0))
        );
    }

    #[test]
    fn test_run_config_from_engine() {
        let config = DaqConfig::from_toml_str(SAMPLE).unwrap();
        let run = RunConfig::from_engine(&config.engine, "slp-1");
        assert_eq!(run.queue_capacity, 8);
        assert_eq!(
            run.backpressure,
            BackpressurePolicy::Block {
                timeout: Duration::from_millis(50)
            }
        );
        assert_eq!(run.settle_delay, Duration::from_millis(10));
        assert!(run.validate().is_ok());
        assert!(run.clone().with_queue_capacity(0).validate().is_err());
        assert!(run.clone().with_sample_rate(10.0).validate().is_ok());
        assert!(run.with_sample_rate(1e-20).validate().unwrap_err().is_configuration());
    }
}
