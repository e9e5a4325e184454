//! Triple Langmuir probe calculations.
//!
//! With tip 3 biased at `V_d3` against tip 1 and tip 2 floating, the electron
//! temperature solves
//!
//! ```text
//! (1 - exp(-V_d2 / Te)) / (1 - exp(-V_d3 / Te)) = 1/2
//! ```
//!
//! which has no closed form and is found by Newton-Raphson.

use super::analysis::{
    debye_length, ion_sound_speed, newton_raphson, positive_or_nan, Solution,
};
use super::constants::{BOHM_FACTOR, ELEMENTARY_CHARGE};
use super::CalculationPipeline;
use crate::probe::ProbeKind;
use crate::record::{keys, DisplayRecord, SampleRecord};
use std::f64::consts::LN_2;

/// Fixed-bias triple probe pipeline.
pub fn pipeline() -> CalculationPipeline {
    CalculationPipeline::new(ProbeKind::TripleLangmuir, display)
        .with_step("floating difference", floating_difference)
        .with_step("electron temperature", temperature)
        .with_step("current", current)
        .with_step("electron density", density)
        .with_step("debye length", debye)
}

/// Solve for Te given `V_d2` and `V_d3`.
///
/// NaN unless `0 < V_d2 < V_d3` and the solver converges.
pub fn solve_temperature(vd2: f64, vd3: f64) -> Solution {
    if !(vd2 > 0.0 && vd3 > vd2) {
        return Solution {
            value: f64::NAN,
            iterations: 0,
        };
    }
    let f = |te: f64| 1.0 - (-vd2 / te).exp() - 0.5 * (1.0 - (-vd3 / te).exp());
    let df = |te: f64| {
        let te2 = te * te;
        -(vd2 / te2) * (-vd2 / te).exp() + 0.5 * (vd3 / te2) * (-vd3 / te).exp()
    };
    // Exact in the limit V_d3 >> Te.
    let guess = vd2 / LN_2;
    let solution = newton_raphson(f, df, guess);
    Solution {
        value: positive_or_nan(solution.value),
        ..solution
    }
}

fn floating_difference(sample: &mut SampleRecord) {
    let vd2 = sample.scalar(keys::RAW_VOLTAGE_1) / sample.settings.sense_gain;
    let bias = sample.scalar(keys::RAW_BIAS);
    sample.set_scalar(keys::FLOATING_DIFFERENCE, vd2);
    sample.set_scalar(keys::BIAS, bias);
}

fn temperature(sample: &mut SampleRecord) {
    let solution = solve_temperature(
        sample.scalar(keys::FLOATING_DIFFERENCE),
        sample.scalar(keys::BIAS),
    );
    sample.set_scalar(keys::ELECTRON_TEMPERATURE, solution.value);
    sample.set_scalar(keys::SOLVER_ITERATIONS, solution.iterations as f64);
}

fn current(sample: &mut SampleRecord) {
    let scale = sample.settings.sense_gain * sample.settings.shunt_resistance;
    let value = sample.scalar(keys::RAW_VOLTAGE_2) / scale;
    sample.set_scalar(keys::CURRENT, value);
}

fn density(sample: &mut SampleRecord) {
    let te = sample.scalar(keys::ELECTRON_TEMPERATURE);
    let vd2 = sample.scalar(keys::FLOATING_DIFFERENCE);
    let current = sample.scalar(keys::CURRENT);
    let value = current
        / (BOHM_FACTOR
            * ELEMENTARY_CHARGE
            * sample.settings.probe_area
            * ion_sound_speed(te, sample.settings.ion_mass_amu)
            * ((vd2 / te).exp() - 1.0));
    sample.set_scalar(keys::ELECTRON_DENSITY, positive_or_nan(value));
}

fn debye(sample: &mut SampleRecord) {
    let value = debye_length(
        sample.scalar(keys::ELECTRON_TEMPERATURE),
        sample.scalar(keys::ELECTRON_DENSITY),
    );
    sample.set_scalar(keys::DEBYE_LENGTH, value);
}

fn display(sample: &SampleRecord) -> DisplayRecord {
    DisplayRecord::from_pairs(
        [
            keys::ELECTRON_TEMPERATURE,
            keys::ELECTRON_DENSITY,
            keys::DEBYE_LENGTH,
            keys::FLOATING_DIFFERENCE,
            keys::CURRENT,
        ]
        .map(|key| (key, sample.scalar(key))),
    )
}
