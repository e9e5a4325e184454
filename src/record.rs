//! Sample and parameter records flowing from the probe thread to the aggregate.
//!
//! A [`SampleRecord`] is produced once per sweep (or per static reading) by a probe
//! thread. It is moved into the hand-off queue and from then on belongs to the
//! consumer, which runs it through a calculation pipeline to obtain a
//! [`ParameterRecord`] carrying every derived field plus a [`DisplayRecord`].

use crate::probe::settings::ProbeSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Canonical record keys.
///
/// Raw keys are written by probe threads; the others by pipeline steps.
pub mod keys {
    /// Commanded probe bias (raw, one value per sweep point)
    pub const RAW_BIAS: &str = "Bias 1";
    /// First sensed voltage (shunt or floating-difference sense)
    pub const RAW_VOLTAGE_1: &str = "Raw voltage 1";
    /// Second sensed voltage (triple probe current shunt)
    pub const RAW_VOLTAGE_2: &str = "Raw voltage 2";

    /// Probe bias (Volts)
    pub const BIAS: &str = "Bias (Volts)";
    /// Probe current
    pub const CURRENT: &str = "Current (Amperes)";
    /// Electron current (probe current minus ion saturation)
    pub const ELECTRON_CURRENT: &str = "Electron current (Amperes)";
    /// Floating potential
    pub const FLOATING_POTENTIAL: &str = "Floating potential (Volts)";
    /// Index of the floating potential in the sweep
    pub const FLOATING_INDEX: &str = "Floating potential index";
    /// Plasma potential
    pub const PLASMA_POTENTIAL: &str = "Plasma potential (Volts)";
    /// Index of the plasma potential in the sweep
    pub const PLASMA_INDEX: &str = "Plasma potential index";
    /// Ion saturation current
    pub const ION_SATURATION_CURRENT: &str = "Ion saturation current (Amperes)";
    /// Electron saturation current
    pub const ELECTRON_SATURATION_CURRENT: &str = "Electron saturation current (Amperes)";
    /// Slope of the characteristic at zero bias
    pub const ZERO_BIAS_SLOPE: &str = "Zero-bias slope (Amperes/Volt)";
    /// Floating voltage difference between triple probe tips
    pub const FLOATING_DIFFERENCE: &str = "Floating voltage difference (Volts)";
    /// Newton-Raphson iterations used by the triple probe solve
    pub const SOLVER_ITERATIONS: &str = "Temperature solver iterations";
    /// Electron temperature
    pub const ELECTRON_TEMPERATURE: &str = "Electron temperature (eV)";
    /// Electron density
    pub const ELECTRON_DENSITY: &str = "Electron density (m^-3)";
    /// Debye length
    pub const DEBYE_LENGTH: &str = "Debye length (Meters)";
    /// Retarding-field analyzer ion energy distribution
    pub const ION_ENERGY_DISTRIBUTION: &str = "Ion energy distribution (Amperes/Volt)";
    /// Peak of the ion energy distribution
    pub const MOST_PROBABLE_ENERGY: &str = "Most probable energy (eV)";
    /// Ion temperature
    pub const ION_TEMPERATURE: &str = "Ion temperature (eV)";
}

/// One value in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    /// A single number (NaN marks a failed calculation)
    Scalar(f64),
    /// A sweep-length series
    Series(Vec<f64>),
}

impl Field {
    /// The scalar value, if this is one.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Field::Scalar(v) => Some(*v),
            Field::Series(_) => None,
        }
    }

    /// The series, if this is one.
    pub fn as_series(&self) -> Option<&[f64]> {
        match self {
            Field::Series(v) => Some(v),
            Field::Scalar(_) => None,
        }
    }
}

/// Ordered mapping from key to field.
pub type Fields = BTreeMap<String, Field>;

/// Raw readings of one sweep, produced by a probe thread.
#[derive(Debug, Clone)]
pub struct SampleRecord {
    /// Per-run sequence number, starting at 0
    pub sequence: u64,
    /// Acquisition time
    pub timestamp: DateTime<Utc>,
    /// Configuration of the probe that produced the sample
    pub settings: Arc<ProbeSettings>,
    /// Readings keyed by channel role; pipeline steps add derived fields
    pub fields: Fields,
}

impl SampleRecord {
    /// Create a sample with no fields yet.
    pub fn new(sequence: u64, settings: Arc<ProbeSettings>) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            settings,
            fields: Fields::new(),
        }
    }

    /// Insert or replace a scalar.
    pub fn set_scalar(&mut self, key: &str, value: f64) {
        self.fields.insert(key.to_string(), Field::Scalar(value));
    }

    /// Insert or replace a series.
    pub fn set_series(&mut self, key: &str, values: Vec<f64>) {
        self.fields.insert(key.to_string(), Field::Series(values));
    }

    /// Scalar at `key`; NaN if absent or not a scalar.
    pub fn scalar(&self, key: &str) -> f64 {
        self.fields
            .get(key)
            .and_then(Field::as_scalar)
            .unwrap_or(f64::NAN)
    }

    /// Series at `key`, if present.
    pub fn series(&self, key: &str) -> Option<&[f64]> {
        self.fields.get(key).and_then(Field::as_series)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }
}

/// One entry of the display subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayValue {
    /// Field name
    pub name: String,
    /// Field value (NaN when the calculation failed)
    pub value: f64,
}

/// Fixed-order subset of a parameter record meant for real-time display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayRecord {
    /// Entries in display order
    pub values: Vec<DisplayValue>,
}

impl DisplayRecord {
    /// Build from `(name, value)` pairs, keeping their order.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(name, value)| DisplayValue {
                    name: name.to_string(),
                    value,
                })
                .collect(),
        }
    }

    /// Value of the entry named `name`.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }

    /// Entry names in order.
    pub fn names(&self) -> Vec<&str> {
        self.values.iter().map(|v| v.name.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of running one sample through a calculation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterRecord {
    /// Sequence number of the originating sample
    pub sequence: u64,
    /// Acquisition time of the originating sample
    pub timestamp: DateTime<Utc>,
    /// Probe identifier
    pub probe_id: String,
    /// Raw and derived fields
    pub fields: Fields,
    /// Display subset
    pub display: DisplayRecord,
}

impl ParameterRecord {
    /// Scalar at `key`; NaN if absent or not a scalar.
    pub fn scalar(&self, key: &str) -> f64 {
        self.fields
            .get(key)
            .and_then(Field::as_scalar)
            .unwrap_or(f64::NAN)
    }
}
