//! Calculation pipelines: raw sample in, parameter record out.
//!
//! A [`CalculationPipeline`] is an ordered list of steps that each add derived
//! fields to a [`SampleRecord`] in place, followed by a display step that picks
//! the fixed-order subset shown to the operator.
//!
//! Steps never fail. A quantity that cannot be computed (no floating-potential
//! crossing, a solver that does not converge, missing raw input) is written as
//! NaN, and every later quantity depending on it comes out NaN as well, so the
//! consumer loop keeps running and the raw sample is never lost.
//!
//! # Example
//! ```
//! use plasma_daq::pipeline::CalculationPipeline;
//! use plasma_daq::probe::ProbeKind;
//!
//! let pipeline = CalculationPipeline::for_kind(ProbeKind::TripleLangmuir);
//! assert_eq!(pipeline.step_names()[0], "floating difference");
//! ```

pub mod analysis;
pub mod analyzer;
pub mod constants;
pub mod langmuir;
pub mod triple;

use crate::probe::ProbeKind;
use crate::record::{keys, DisplayRecord, ParameterRecord, SampleRecord};
use std::fmt;

/// In-place calculation step.
pub type Step = fn(&mut SampleRecord);

/// Final step extracting the display subset.
pub type DisplayStep = fn(&SampleRecord) -> DisplayRecord;

/// Ordered calculation steps for one probe kind.
#[derive(Clone)]
pub struct CalculationPipeline {
    kind: ProbeKind,
    steps: Vec<(&'static str, Step)>,
    display: DisplayStep,
}

impl CalculationPipeline {
    /// Empty pipeline ending in `display`.
    pub fn new(kind: ProbeKind, display: DisplayStep) -> Self {
        Self {
            kind,
            steps: Vec::new(),
            display,
        }
    }

    /// Append a named step.
    pub fn with_step(mut self, name: &'static str, step: Step) -> Self {
        self.steps.push((name, step));
        self
    }

    /// The standard pipeline for `kind`.
    pub fn for_kind(kind: ProbeKind) -> Self {
        match kind {
            ProbeKind::SingleLangmuir => langmuir::single_pipeline(),
            ProbeKind::DoubleLangmuir => langmuir::double_pipeline(),
            ProbeKind::TripleLangmuir => triple::pipeline(),
            ProbeKind::EnergyAnalyzer => analyzer::pipeline(),
        }
    }

    /// Probe kind this pipeline interprets.
    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    /// Step names in execution order, display step excluded.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|(name, _)| *name).collect()
    }

    /// Run every step on `sample`, then extract the display subset.
    pub fn run(&self, mut sample: SampleRecord) -> ParameterRecord {
        for (_, step) in &self.steps {
            step(&mut sample);
        }
        let display = (self.display)(&sample);
        ParameterRecord {
            sequence: sample.sequence,
            timestamp: sample.timestamp,
            probe_id: sample.settings.probe_id.clone(),
            fields: sample.fields,
            display,
        }
    }
}

impl fmt::Debug for CalculationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculationPipeline")
            .field("kind", &self.kind)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Bias and probe current from the raw sweep: `current = raw / (sense_gain * R)`.
///
/// A raw sweep whose bias and readings differ in length is left unconverted, so
/// everything derived from it comes out NaN.
pub(crate) fn convert_sweep(sample: &mut SampleRecord) {
    let scale = sample.settings.sense_gain * sample.settings.shunt_resistance;
    let converted = match (sample.series(keys::RAW_BIAS), sample.series(keys::RAW_VOLTAGE_1)) {
        (Some(bias), Some(raw)) if bias.len() == raw.len() => {
            Some((bias.to_vec(), raw.iter().map(|v| v / scale).collect::<Vec<_>>()))
        }
        _ => None,
    };
    if let Some((bias, current)) = converted {
        sample.set_series(keys::BIAS, bias);
        sample.set_series(keys::CURRENT, current);
    }
}

/// Converted bias and current, only when both exist and pair up point by point.
pub(crate) fn sweep_series(sample: &SampleRecord) -> Option<(&[f64], &[f64])> {
    let bias = sample.series(keys::BIAS)?;
    let current = sample.series(keys::CURRENT)?;
    (bias.len() == current.len()).then_some((bias, current))
}

/// Mean of the first (or last) `fraction` of `values`, at least one point.
pub(crate) fn wing_mean(values: &[f64], fraction: f64, tail: bool) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let count = ((values.len() as f64 * fraction).ceil() as usize).clamp(1, values.len());
    let wing = if tail {
        &values[values.len() - count..]
    } else {
        &values[..count]
    };
    wing.iter().sum::<f64>() / count as f64
}

/// Scalar at `key` as an index into a series, if it is one.
pub(crate) fn index_field(sample: &SampleRecord, key: &str) -> Option<usize> {
    let value = sample.scalar(key);
    if value.is_finite() && value >= 0.0 {
        Some(value as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::settings::ProbeSettings;
    use std::sync::Arc;

    fn add_one(sample: &mut SampleRecord) {
        let value = sample.scalar("x");
        sample.set_scalar("x", value + 1.0);
    }

    fn double(sample: &mut SampleRecord) {
        let value = sample.scalar("x");
        sample.set_scalar("x", value * 2.0);
    }

    fn show_x(sample: &SampleRecord) -> DisplayRecord {
        DisplayRecord::from_pairs([("x", sample.scalar("x"))])
    }

    #[test]
    fn test_steps_run_in_order() {
        let pipeline = CalculationPipeline::new(ProbeKind::SingleLangmuir, show_x)
            .with_step("add one", add_one)
            .with_step("double", double);
        let settings = Arc::new(ProbeSettings::example(ProbeKind::SingleLangmuir));
        let mut sample = SampleRecord::new(7, settings);
        sample.set_scalar("x", 1.0);

        let record = pipeline.run(sample);
        assert_eq!(record.sequence, 7);
        assert_eq!(record.scalar("x"), 4.0);
        assert_eq!(record.display.get("x"), Some(4.0));
        assert_eq!(pipeline.step_names(), vec!["add one", "double"]);
    }

    #[test]
    fn test_every_kind_has_a_pipeline() {
        for kind in [
            ProbeKind::SingleLangmuir,
            ProbeKind::DoubleLangmuir,
            ProbeKind::TripleLangmuir,
            ProbeKind::EnergyAnalyzer,
        ] {
            let pipeline = CalculationPipeline::for_kind(kind);
            assert_eq!(pipeline.kind(), kind);
            assert!(!pipeline.step_names().is_empty());
        }
    }

    #[test]
    fn test_empty_sample_degrades_to_nan() {
        for kind in [
            ProbeKind::SingleLangmuir,
            ProbeKind::DoubleLangmuir,
            ProbeKind::TripleLangmuir,
            ProbeKind::EnergyAnalyzer,
        ] {
            let sample = SampleRecord::new(0, Arc::new(ProbeSettings::example(kind)));
            let record = CalculationPipeline::for_kind(kind).run(sample);
            assert!(!record.display.is_empty());
            assert!(record.display.values.iter().all(|v| v.value.is_nan()));
        }
    }

    #[test]
    fn test_mismatched_sweep_is_not_converted() {
        for kind in [
            ProbeKind::SingleLangmuir,
            ProbeKind::DoubleLangmuir,
            ProbeKind::EnergyAnalyzer,
        ] {
            let mut sample = SampleRecord::new(0, Arc::new(ProbeSettings::example(kind)));
            sample.set_series(keys::RAW_BIAS, vec![-3.0, -2.0, -1.0]);
            sample.set_series(keys::RAW_VOLTAGE_1, vec![-1.0, -0.9, -0.5, -0.4, 0.1, 2.0]);

            let record = CalculationPipeline::for_kind(kind).run(sample);
            assert!(!record.fields.contains_key(keys::CURRENT), "{kind}");
            assert!(record.display.values.iter().all(|v| v.value.is_nan()), "{kind}");
        }
    }

    #[test]
    fn test_sweep_series_requires_equal_lengths() {
        let settings = Arc::new(ProbeSettings::example(ProbeKind::SingleLangmuir));
        let mut sample = SampleRecord::new(0, settings);
        sample.set_series(keys::BIAS, vec![0.0, 1.0]);
        sample.set_series(keys::CURRENT, vec![0.0, 1.0, 2.0]);
        assert!(sweep_series(&sample).is_none());
        sample.set_series(keys::CURRENT, vec![0.0, 1.0]);
        assert!(sweep_series(&sample).is_some());
    }

    #[test]
    fn test_wing_mean() {
        let values = [1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0, 17.0, 19.0];
        assert_eq!(wing_mean(&values, 0.2, false), 2.0);
        assert_eq!(wing_mean(&values, 0.2, true), 18.0);
        assert_eq!(wing_mean(&values, 0.0, false), 1.0);
        assert!(wing_mean(&[], 0.1, false).is_nan());
    }
}
