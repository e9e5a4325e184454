//! Retarding-field energy analyzer calculations.
//!
//! The collector current `I(V)` counts ions with energy above the discriminator
//! voltage, so `-dI/dV` is the ion energy distribution. Its peak gives the most
//! probable energy and the exponential tail above the peak gives the ion
//! temperature.

use super::analysis::{argmax, derivative, linear_fit, positive_or_nan};
use super::{convert_sweep, sweep_series, CalculationPipeline};
use crate::probe::ProbeKind;
use crate::record::{keys, DisplayRecord, SampleRecord};

/// Tail window used for the temperature fit, as fractions of the peak current.
const TAIL_WINDOW: (f64, f64) = (1e-3, 0.25);

/// Energy analyzer pipeline.
pub fn pipeline() -> CalculationPipeline {
    CalculationPipeline::new(ProbeKind::EnergyAnalyzer, display)
        .with_step("current", convert_sweep)
        .with_step("energy distribution", energy_distribution)
        .with_step("most probable energy", most_probable_energy)
        .with_step("ion temperature", ion_temperature)
}

fn energy_distribution(sample: &mut SampleRecord) {
    let Some((bias, current)) = sweep_series(sample) else {
        return;
    };
    let distribution = derivative(bias, current)
        .into_iter()
        .map(|slope| -slope)
        .collect();
    sample.set_series(keys::ION_ENERGY_DISTRIBUTION, distribution);
}

fn most_probable_energy(sample: &mut SampleRecord) {
    let value = match (
        sample.series(keys::BIAS),
        sample.series(keys::ION_ENERGY_DISTRIBUTION),
    ) {
        (Some(bias), Some(distribution)) => argmax(distribution)
            .filter(|&i| distribution[i] > 0.0)
            .and_then(|i| bias.get(i).copied())
            .unwrap_or(f64::NAN),
        _ => f64::NAN,
    };
    sample.set_scalar(keys::MOST_PROBABLE_ENERGY, value);
}

fn ion_temperature(sample: &mut SampleRecord) {
    let peak_energy = sample.scalar(keys::MOST_PROBABLE_ENERGY);
    let value = match sweep_series(sample) {
        Some((bias, current)) if peak_energy.is_finite() => {
            let reference = current.iter().copied().fold(f64::NAN, f64::max);
            let (lo, hi) = (TAIL_WINDOW.0 * reference, TAIL_WINDOW.1 * reference);
            let (x, y): (Vec<f64>, Vec<f64>) = bias
                .iter()
                .zip(current)
                .filter(|&(&v, &i)| v > peak_energy && i > lo && i < hi)
                .map(|(&v, &i)| (v, i.ln()))
                .unzip();
            let (slope, _) = linear_fit(&x, &y);
            positive_or_nan(-1.0 / slope)
        }
        _ => f64::NAN,
    };
    sample.set_scalar(keys::ION_TEMPERATURE, value);
}

fn display(sample: &SampleRecord) -> DisplayRecord {
    DisplayRecord::from_pairs(
        [keys::MOST_PROBABLE_ENERGY, keys::ION_TEMPERATURE].map(|key| (key, sample.scalar(key))),
    )
}
