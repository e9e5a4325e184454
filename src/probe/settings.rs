//! Per-probe settings resolved from a [`ConfigManager`] at setup time.

use crate::config::ConfigManager;
use crate::error::{ProbeError, Result};
use crate::hardware::{ROLE_FLOATING, ROLE_SHUNT};
use crate::probe::ProbeKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Argon, in atomic mass units.
pub const DEFAULT_ION_MASS_AMU: f64 = 39.948;

/// Bias sweep of a sweeping probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// First bias (V)
    pub start: f64,
    /// Last bias (V)
    pub stop: f64,
    /// Number of bias points, endpoints included
    pub steps: usize,
    /// Readings averaged at each point
    pub samples_per_point: usize,
}

impl SweepSettings {
    /// Bias of every sweep point.
    pub fn points(&self) -> Vec<f64> {
        if self.steps < 2 {
            return vec![self.start; self.steps];
        }
        let step = (self.stop - self.start) / (self.steps - 1) as f64;
        (0..self.steps)
            .map(|i| self.start + step * i as f64)
            .collect()
    }
}

/// Immutable configuration of one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Probe identifier
    pub probe_id: String,
    /// Probe type
    pub kind: ProbeKind,
    /// Relay addresses, enabled in this order
    pub relays: Vec<String>,
    /// Bias amplifier address
    pub amplifier: String,
    /// Sense channel address by role (`shunt`, `floating`)
    pub channels: BTreeMap<String, String>,
    /// Sweep, for sweeping probe kinds
    pub sweep: SweepSettings,
    /// Fixed bias of a triple probe (V)
    pub bias: f64,
    /// Volts at the probe per volt of amplifier command
    pub amplifier_gain: f64,
    /// Volts at the input per volt sensed
    pub sense_gain: f64,
    /// Current shunt (Ω)
    pub shunt_resistance: f64,
    /// Collecting area (m²)
    pub probe_area: f64,
    /// Ion mass (amu)
    pub ion_mass_amu: f64,
}

impl ProbeSettings {
    /// Read every setting of `probe_id`.
    ///
    /// `kind`, `relays`, `amplifier` and `shunt_resistance` are required; everything
    /// else falls back to a per-kind default.
    pub fn resolve(config: &dyn ConfigManager, probe_id: &str) -> Result<Self> {
        let kind: ProbeKind = required(config, probe_id, "kind")?;
        let relays: Vec<String> = required(config, probe_id, "relays")?;
        let amplifier: String = required(config, probe_id, "amplifier")?;
        let shunt_resistance: f64 = required(config, probe_id, "shunt_resistance")?;

        let default_sweep = kind.default_sweep();
        let sweep = SweepSettings {
            start: optional(config, probe_id, "sweep_start")?.unwrap_or(default_sweep.start),
            stop: optional(config, probe_id, "sweep_stop")?.unwrap_or(default_sweep.stop),
            steps: optional(config, probe_id, "sweep_steps")?.unwrap_or(default_sweep.steps),
            samples_per_point: optional(config, probe_id, "samples_per_point")?
                .unwrap_or(default_sweep.samples_per_point),
        };

        let channels = optional(config, probe_id, "channels")?
            .unwrap_or_else(|| default_channels(kind));

        let settings = Self {
            probe_id: probe_id.to_string(),
            kind,
            relays,
            amplifier,
            channels,
            sweep,
            bias: optional(config, probe_id, "bias")?.unwrap_or(20.0),
            amplifier_gain: optional(config, probe_id, "amplifier_gain")?.unwrap_or(1.0),
            sense_gain: optional(config, probe_id, "sense_gain")?.unwrap_or(1.0),
            shunt_resistance,
            probe_area: optional(config, probe_id, "probe_area")?.unwrap_or(1e-5),
            ion_mass_amu: optional(config, probe_id, "ion_mass_amu")?
                .unwrap_or(DEFAULT_ION_MASS_AMU),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Settings wired to the mock bench's default addresses.
    pub fn example(kind: ProbeKind) -> Self {
        Self {
            probe_id: format!("{kind}-example"),
            kind,
            relays: vec!["do0".to_string()],
            amplifier: "ao0".to_string(),
            channels: default_channels(kind),
            sweep: kind.default_sweep(),
            bias: 20.0,
            amplifier_gain: 1.0,
            sense_gain: 1.0,
            shunt_resistance: 100.0,
            probe_area: 1e-5,
            ion_mass_amu: DEFAULT_ION_MASS_AMU,
        }
    }

    /// Reject physically meaningless values.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("amplifier_gain", self.amplifier_gain),
            ("sense_gain", self.sense_gain),
            ("shunt_resistance", self.shunt_resistance),
            ("probe_area", self.probe_area),
            ("ion_mass_amu", self.ion_mass_amu),
        ];
        for (key, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ProbeError::Configuration(format!(
                    "Probe '{}': {key} must be positive, got {value}",
                    self.probe_id
                )));
            }
        }

        if self.kind.is_sweeping() {
            if self.sweep.steps < 3 {
                return Err(ProbeError::Configuration(format!(
                    "Probe '{}': sweep_steps must be at least 3",
                    self.probe_id
                )));
            }
            if !(self.sweep.stop > self.sweep.start) {
                return Err(ProbeError::Configuration(format!(
                    "Probe '{}': sweep_stop must exceed sweep_start",
                    self.probe_id
                )));
            }
        }
        if self.sweep.samples_per_point == 0 {
            return Err(ProbeError::Configuration(format!(
                "Probe '{}': samples_per_point must be at least 1",
                self.probe_id
            )));
        }
        Ok(())
    }
}

fn default_channels(kind: ProbeKind) -> BTreeMap<String, String> {
    let mut channels = BTreeMap::new();
    channels.insert(ROLE_SHUNT.to_string(), "ai0".to_string());
    if kind == ProbeKind::TripleLangmuir {
        channels.insert(ROLE_FLOATING.to_string(), "ai1".to_string());
    }
    channels
}

fn optional<T: DeserializeOwned>(
    config: &dyn ConfigManager,
    probe_id: &str,
    key: &str,
) -> Result<Option<T>> {
    match config.get_config(probe_id, key)? {
        None => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
            ProbeError::Configuration(format!("Probe '{probe_id}': invalid '{key}': {e}"))
        }),
    }
}

fn required<T: DeserializeOwned>(
    config: &dyn ConfigManager,
    probe_id: &str,
    key: &str,
) -> Result<T> {
    optional(config, probe_id, key)?.ok_or_else(|| ProbeError::MissingConfigKey {
        probe_id: probe_id.to_string(),
        key: key.to_string(),
    })
}
