//! How each probe kind turns hardware I/O into one raw sample.

use crate::error::Result;
use crate::flags::SystemFlags;
use crate::hardware::{ProbeHardware, ROLE_FLOATING, ROLE_SHUNT};
use crate::probe::settings::ProbeSettings;
use crate::record::{keys, SampleRecord};

/// Acquisition strategy of a probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    /// Step the bias through `points`, averaging `samples_per_point` shunt
    /// readings at each
    Sweep {
        /// Bias of every point
        points: Vec<f64>,
        /// Readings averaged per point
        samples_per_point: usize,
    },
    /// Hold a fixed bias and average `samples_per_point` readings of the floating
    /// difference and the shunt
    Static {
        /// Applied bias
        bias: f64,
        /// Readings averaged per sample
        samples_per_point: usize,
    },
}

impl Acquisition {
    /// Strategy for the probe described by `settings`.
    pub fn for_settings(settings: &ProbeSettings) -> Self {
        if settings.kind.is_sweeping() {
            Acquisition::Sweep {
                points: settings.sweep.points(),
                samples_per_point: settings.sweep.samples_per_point,
            }
        } else {
            Acquisition::Static {
                bias: settings.bias,
                samples_per_point: settings.sweep.samples_per_point,
            }
        }
    }

    /// Acquire one sample into `sample`.
    ///
    /// Returns `Ok(false)` if an emergency or shutdown interrupted a sweep; the
    /// partial sample must then be discarded.
    pub fn acquire(
        &self,
        hardware: &mut ProbeHardware,
        flags: &SystemFlags,
        sample: &mut SampleRecord,
    ) -> Result<bool> {
        match self {
            Acquisition::Sweep {
                points,
                samples_per_point,
            } => {
                let mut raw = Vec::with_capacity(points.len());
                for &bias in points {
                    if flags.command.emergency.is_set() || flags.command.is_shutdown() {
                        return Ok(false);
                    }
                    hardware.set_bias(bias)?;
                    let mut sum = 0.0;
                    for _ in 0..*samples_per_point {
                        sum += hardware.read_role(ROLE_SHUNT)?;
                    }
                    raw.push(sum / *samples_per_point as f64);
                }
                sample.set_series(keys::RAW_BIAS, points.clone());
                sample.set_series(keys::RAW_VOLTAGE_1, raw);
            }
            Acquisition::Static {
                bias,
                samples_per_point,
            } => {
                hardware.set_bias(*bias)?;
                let (mut floating, mut shunt) = (0.0, 0.0);
                for _ in 0..*samples_per_point {
                    floating += hardware.read_role(ROLE_FLOATING)?;
                    shunt += hardware.read_role(ROLE_SHUNT)?;
                }
                let n = *samples_per_point as f64;
                sample.set_scalar(keys::RAW_BIAS, *bias);
                sample.set_scalar(keys::RAW_VOLTAGE_1, floating / n);
                sample.set_scalar(keys::RAW_VOLTAGE_2, shunt / n);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockHardwareFactory, PlasmaModel};
    use crate::probe::ProbeKind;
    use std::sync::Arc;

    fn bench(kind: ProbeKind) -> (ProbeHardware, Arc<ProbeSettings>, MockHardwareFactory) {
        let settings = Arc::new(ProbeSettings::example(kind));
        let factory = MockHardwareFactory::new(kind, PlasmaModel::default());
        let hardware = ProbeHardware::resolve(&factory, &settings).unwrap();
        (hardware, settings, factory)
    }

    #[test]
    fn test_sweep_records_series() {
        let (mut hardware, settings, factory) = bench(ProbeKind::SingleLangmuir);
        let flags = SystemFlags::new();
        let acquisition = Acquisition::for_settings(&settings);
        let mut sample = SampleRecord::new(0, Arc::clone(&settings));

        assert!(acquisition.acquire(&mut hardware, &flags, &mut sample).unwrap());
        let bias = sample.series(keys::RAW_BIAS).unwrap();
        let raw = sample.series(keys::RAW_VOLTAGE_1).unwrap();
        assert_eq!(bias.len(), settings.sweep.steps);
        assert_eq!(raw.len(), settings.sweep.steps);
        assert_eq!(factory.reads(), settings.sweep.steps as u64);
        // Ion side of the characteristic is negative, electron side positive.
        assert!(raw[0] < 0.0);
        assert!(raw[raw.len() - 1] > 0.0);
    }

    #[test]
    fn test_emergency_aborts_sweep() {
        let (mut hardware, settings, _factory) = bench(ProbeKind::DoubleLangmuir);
        let flags = SystemFlags::new();
        flags.command.emergency.set();
        let mut sample = SampleRecord::new(0, Arc::clone(&settings));
        let acquisition = Acquisition::for_settings(&settings);
        assert!(!acquisition.acquire(&mut hardware, &flags, &mut sample).unwrap());
        assert!(!sample.contains(keys::RAW_VOLTAGE_1));
    }

    #[test]
    fn test_static_records_scalars() {
        let (mut hardware, settings, factory) = bench(ProbeKind::TripleLangmuir);
        let flags = SystemFlags::new();
        let mut sample = SampleRecord::new(0, Arc::clone(&settings));
        Acquisition::for_settings(&settings)
            .acquire(&mut hardware, &flags, &mut sample)
            .unwrap();
        assert_eq!(sample.scalar(keys::RAW_BIAS), settings.bias);
        assert!(sample.scalar(keys::RAW_VOLTAGE_1) > 0.0);
        assert!(sample.scalar(keys::RAW_VOLTAGE_2) > 0.0);
        assert!((factory.applied_bias() - settings.bias).abs() < 1e-12);
    }

    #[test]
    fn test_read_failure_propagates() {
        let (mut hardware, settings, factory) = bench(ProbeKind::SingleLangmuir);
        factory.fail_reads_after(3);
        let mut sample = SampleRecord::new(0, Arc::clone(&settings));
        let err = Acquisition::for_settings(&settings)
            .acquire(&mut hardware, &SystemFlags::new(), &mut sample)
            .unwrap_err();
        assert!(err.is_hardware());
    }
}
