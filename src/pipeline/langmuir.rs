//! Single and double Langmuir probe calculations.

use super::analysis::{
    bohm_density, debye_length, derivative, floating_index, linear_fit, plasma_index,
    positive_or_nan,
};
use super::{convert_sweep, index_field, sweep_series, wing_mean, CalculationPipeline};
use crate::probe::ProbeKind;
use crate::record::{keys, DisplayRecord, SampleRecord};

/// Share of the sweep averaged for a saturation current.
const WING_FRACTION: f64 = 0.05;

/// Single probe: potentials from the I-V knee, Te from the retardation region.
pub fn single_pipeline() -> CalculationPipeline {
    CalculationPipeline::new(ProbeKind::SingleLangmuir, single_display)
        .with_step("current", convert_sweep)
        .with_step("floating potential", floating_potential)
        .with_step("plasma potential", plasma_potential)
        .with_step("ion saturation current", single_ion_saturation)
        .with_step("electron current", electron_current)
        .with_step("electron temperature", single_temperature)
        .with_step("electron saturation current", electron_saturation)
        .with_step("electron density", density)
        .with_step("debye length", debye)
}

/// Double probe: symmetric tanh characteristic, Te from the zero-bias slope.
pub fn double_pipeline() -> CalculationPipeline {
    CalculationPipeline::new(ProbeKind::DoubleLangmuir, double_display)
        .with_step("current", convert_sweep)
        .with_step("ion saturation current", double_ion_saturation)
        .with_step("zero-bias slope", zero_bias_slope)
        .with_step("electron temperature", double_temperature)
        .with_step("electron density", density)
        .with_step("debye length", debye)
}

fn floating_potential(sample: &mut SampleRecord) {
    let found = sweep_series(sample).and_then(|(bias, current)| {
        let index = floating_index(current)?;
        Some((index as f64, *bias.get(index)?))
    });
    let (index, potential) = found.unwrap_or((f64::NAN, f64::NAN));
    sample.set_scalar(keys::FLOATING_INDEX, index);
    sample.set_scalar(keys::FLOATING_POTENTIAL, potential);
}

fn plasma_potential(sample: &mut SampleRecord) {
    let start = index_field(sample, keys::FLOATING_INDEX);
    let found = match (start, sweep_series(sample)) {
        (Some(start), Some((bias, current))) => {
            let slope = derivative(bias, current);
            let curvature = derivative(bias, &slope);
            plasma_index(&curvature, start)
                .and_then(|index| Some((index as f64, *bias.get(index)?)))
        }
        _ => None,
    };
    let (index, potential) = found.unwrap_or((f64::NAN, f64::NAN));
    sample.set_scalar(keys::PLASMA_INDEX, index);
    sample.set_scalar(keys::PLASMA_POTENTIAL, potential);
}

fn single_ion_saturation(sample: &mut SampleRecord) {
    let value = sample
        .series(keys::CURRENT)
        .map_or(f64::NAN, |current| -wing_mean(current, WING_FRACTION, false));
    sample.set_scalar(keys::ION_SATURATION_CURRENT, positive_or_nan(value));
}

fn electron_current(sample: &mut SampleRecord) {
    let ion_saturation = sample.scalar(keys::ION_SATURATION_CURRENT);
    if let Some(current) = sample.series(keys::CURRENT) {
        let electron = current.iter().map(|i| i + ion_saturation).collect();
        sample.set_series(keys::ELECTRON_CURRENT, electron);
    }
}

fn single_temperature(sample: &mut SampleRecord) {
    let range = index_field(sample, keys::FLOATING_INDEX)
        .zip(index_field(sample, keys::PLASMA_INDEX));
    let te = match (range, sample.series(keys::BIAS), sample.series(keys::ELECTRON_CURRENT)) {
        (Some((lo, hi)), Some(bias), Some(electron)) if lo < hi && hi < bias.len() => {
            let (x, y): (Vec<f64>, Vec<f64>) = (lo..=hi)
                .filter_map(|i| Some((*bias.get(i)?, *electron.get(i)?)))
                .filter(|&(_, i)| i > 0.0)
                .map(|(v, i)| (v, i.ln()))
                .unzip();
            let (slope, _) = linear_fit(&x, &y);
            positive_or_nan(1.0 / slope)
        }
        _ => f64::NAN,
    };
    sample.set_scalar(keys::ELECTRON_TEMPERATURE, te);
}

fn electron_saturation(sample: &mut SampleRecord) {
    let value = match (
        index_field(sample, keys::PLASMA_INDEX),
        sample.series(keys::ELECTRON_CURRENT),
    ) {
        (Some(index), Some(electron)) => electron.get(index).copied().unwrap_or(f64::NAN),
        _ => f64::NAN,
    };
    sample.set_scalar(keys::ELECTRON_SATURATION_CURRENT, positive_or_nan(value));
}

fn double_ion_saturation(sample: &mut SampleRecord) {
    let value = sample.series(keys::CURRENT).map_or(f64::NAN, |current| {
        (wing_mean(current, WING_FRACTION, true) - wing_mean(current, WING_FRACTION, false)) / 2.0
    });
    sample.set_scalar(keys::ION_SATURATION_CURRENT, positive_or_nan(value));
}

fn zero_bias_slope(sample: &mut SampleRecord) {
    let value = sweep_series(sample).map_or(f64::NAN, |(bias, current)| {
        let slope = derivative(bias, current);
        bias.iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .min_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
            .and_then(|(i, _)| slope.get(i).copied())
            .unwrap_or(f64::NAN)
    });
    sample.set_scalar(keys::ZERO_BIAS_SLOPE, value);
}

fn double_temperature(sample: &mut SampleRecord) {
    let ion_saturation = sample.scalar(keys::ION_SATURATION_CURRENT);
    let slope = sample.scalar(keys::ZERO_BIAS_SLOPE);
    sample.set_scalar(
        keys::ELECTRON_TEMPERATURE,
        positive_or_nan(ion_saturation / (2.0 * slope)),
    );
}

fn density(sample: &mut SampleRecord) {
    let value = bohm_density(
        sample.scalar(keys::ION_SATURATION_CURRENT),
        sample.scalar(keys::ELECTRON_TEMPERATURE),
        sample.settings.probe_area,
        sample.settings.ion_mass_amu,
    );
    sample.set_scalar(keys::ELECTRON_DENSITY, value);
}

pub(crate) fn debye(sample: &mut SampleRecord) {
    let value = debye_length(
        sample.scalar(keys::ELECTRON_TEMPERATURE),
        sample.scalar(keys::ELECTRON_DENSITY),
    );
    sample.set_scalar(keys::DEBYE_LENGTH, value);
}

fn single_display(sample: &SampleRecord) -> DisplayRecord {
    DisplayRecord::from_pairs(
        [
            keys::ELECTRON_TEMPERATURE,
            keys::ELECTRON_DENSITY,
            keys::FLOATING_POTENTIAL,
            keys::PLASMA_POTENTIAL,
            keys::DEBYE_LENGTH,
            keys::ION_SATURATION_CURRENT,
            keys::ELECTRON_SATURATION_CURRENT,
        ]
        .map(|key| (key, sample.scalar(key))),
    )
}

fn double_display(sample: &SampleRecord) -> DisplayRecord {
    DisplayRecord::from_pairs(
        [
            keys::ELECTRON_TEMPERATURE,
            keys::ELECTRON_DENSITY,
            keys::DEBYE_LENGTH,
            keys::ION_SATURATION_CURRENT,
            keys::ZERO_BIAS_SLOPE,
        ]
        .map(|key| (key, sample.scalar(key))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::PlasmaModel;
    use crate::pipeline::analysis;
    use crate::probe::settings::ProbeSettings;
    use std::sync::Arc;

    /// A sweep of `kind` through `model`, as the probe thread would record it.
    fn modelled_sample(kind: ProbeKind, model: &PlasmaModel) -> SampleRecord {
        let settings = Arc::new(ProbeSettings::example(kind));
        let bias = settings.sweep.points();
        let raw = bias
            .iter()
            .map(|&v| model.current(kind, v) * settings.shunt_resistance * settings.sense_gain)
            .collect();
        let mut sample = SampleRecord::new(0, settings);
        sample.set_series(keys::RAW_BIAS, bias);
        sample.set_series(keys::RAW_VOLTAGE_1, raw);
        sample
    }

    fn close(actual: f64, expected: f64, tolerance: f64) -> bool {
        (actual - expected).abs() <= tolerance * expected.abs()
    }

    #[test]
    fn test_potentials_on_short_ramp() {
        let mut settings = ProbeSettings::example(ProbeKind::SingleLangmuir);
        settings.shunt_resistance = 1.0;
        let mut sample = SampleRecord::new(0, Arc::new(settings));
        sample.set_series(keys::RAW_BIAS, vec![-3.0, -2.0, -1.0, 0.0, 1.0, 2.0]);
        sample.set_series(keys::RAW_VOLTAGE_1, vec![-1.0, -0.9, -0.5, 0.4, 2.0, 2.1]);

        let record = single_pipeline().run(sample);
        let floating = record.scalar(keys::FLOATING_INDEX);
        let plasma = record.scalar(keys::PLASMA_INDEX);
        // 0.4 is the current closest to zero around the single sign flip.
        assert_eq!(floating, 3.0);
        assert_eq!(record.scalar(keys::FLOATING_POTENTIAL), 0.0);
        assert!(plasma > floating);
    }

    #[test]
    fn test_single_probe_recovers_model() {
        let model = PlasmaModel::default();
        let record = single_pipeline().run(modelled_sample(ProbeKind::SingleLangmuir, &model));

        let vf = record.scalar(keys::FLOATING_POTENTIAL);
        let vp = record.scalar(keys::PLASMA_POTENTIAL);
        let te = record.scalar(keys::ELECTRON_TEMPERATURE);
        let iis = record.scalar(keys::ION_SATURATION_CURRENT);

        assert!((vf - model.floating_potential()).abs() <= 0.5, "Vf {vf}");
        assert!((vp - model.plasma_potential).abs() <= 1.0, "Vp {vp}");
        assert!(close(te, model.electron_temperature_ev, 0.05), "Te {te}");
        assert!(close(iis, model.ion_saturation_current, 0.01), "Iis {iis}");

        let expected_density =
            analysis::bohm_density(iis, te, 1e-5, crate::probe::settings::DEFAULT_ION_MASS_AMU);
        assert!(close(record.scalar(keys::ELECTRON_DENSITY), expected_density, 1e-9));
        assert!(record.scalar(keys::DEBYE_LENGTH) > 0.0);
        assert_eq!(record.display.len(), 7);
        assert_eq!(record.display.names()[0], keys::ELECTRON_TEMPERATURE);
    }

    #[test]
    fn test_missing_knee_propagates_nan() {
        // Linear characteristic: one zero crossing, no curvature.
        let mut settings = ProbeSettings::example(ProbeKind::SingleLangmuir);
        settings.shunt_resistance = 1.0;
        let mut sample = SampleRecord::new(0, Arc::new(settings));
        let bias: Vec<f64> = (0..11).map(|i| i as f64 - 5.0).collect();
        let raw = bias.iter().map(|v| v * 0.5).collect();
        sample.set_series(keys::RAW_BIAS, bias);
        sample.set_series(keys::RAW_VOLTAGE_1, raw);

        let record = single_pipeline().run(sample);
        assert!(record.scalar(keys::FLOATING_POTENTIAL).is_finite());
        for key in [
            keys::PLASMA_POTENTIAL,
            keys::ELECTRON_TEMPERATURE,
            keys::ELECTRON_SATURATION_CURRENT,
            keys::ELECTRON_DENSITY,
            keys::DEBYE_LENGTH,
        ] {
            assert!(record.display.get(key).is_some_and(f64::is_nan), "{key}");
        }
    }

    #[test]
    fn test_short_bias_series_degrades_to_nan() {
        let mut settings = ProbeSettings::example(ProbeKind::SingleLangmuir);
        settings.shunt_resistance = 1.0;
        let mut sample = SampleRecord::new(0, Arc::new(settings));
        // Converted series that do not pair up: the crossing lies past the bias.
        sample.set_series(keys::BIAS, vec![-3.0, -2.0, -1.0]);
        sample.set_series(keys::CURRENT, vec![-1.0, -0.9, -0.5, -0.4, 0.1, 2.0]);

        // No raw conversion step, so the mismatched series reach every later step.
        let steps = CalculationPipeline::new(ProbeKind::SingleLangmuir, single_display)
            .with_step("floating potential", floating_potential)
            .with_step("plasma potential", plasma_potential)
            .with_step("ion saturation current", single_ion_saturation)
            .with_step("electron current", electron_current)
            .with_step("electron temperature", single_temperature)
            .with_step("electron saturation current", electron_saturation)
            .with_step("electron density", density)
            .with_step("debye length", debye)
            .with_step("zero-bias slope", zero_bias_slope)
            .with_step("double temperature", double_temperature);

        let record = steps.run(sample);
        for key in [
            keys::FLOATING_POTENTIAL,
            keys::PLASMA_POTENTIAL,
            keys::ELECTRON_TEMPERATURE,
            keys::ELECTRON_DENSITY,
        ] {
            assert!(record.scalar(key).is_nan(), "{key}");
        }
        assert!(record.scalar(keys::ZERO_BIAS_SLOPE).is_nan());
    }

    #[test]
    fn test_double_probe_recovers_model() {
        let model = PlasmaModel::default();
        let record = double_pipeline().run(modelled_sample(ProbeKind::DoubleLangmuir, &model));

        let te = record.scalar(keys::ELECTRON_TEMPERATURE);
        let iis = record.scalar(keys::ION_SATURATION_CURRENT);
        assert!(close(te, model.electron_temperature_ev, 0.02), "Te {te}");
        assert!(close(iis, model.ion_saturation_current, 0.01), "Iis {iis}");
        assert!(record.scalar(keys::ELECTRON_DENSITY) > 0.0);
        assert_eq!(record.display.len(), 5);
    }
}
