//! Mock Hardware Implementations
//!
//! Simulated relays, amplifier and sense channels driven by an analytic plasma
//! model, for running the whole acquisition path without a DAQ card.
//!
//! # Model
//!
//! The amplifier output (times its gain) is the probe bias. Sense channels report
//! the probe response to that bias:
//!
//! - single probe: exponential electron retardation below the plasma potential,
//!   electron saturation above it
//! - double probe: `I_sat * tanh(V / 2Te)`
//! - triple probe: the floating difference `V_d2` for a fixed `V_d3`, and the
//!   matching current
//! - energy analyzer: a thermal ion beam cut off by the discriminator voltage
//!
//! Every relay and amplifier write is appended to a [`Journal`] together with the
//! `operating` flag state observed at that moment, which lets tests check the
//! energize/de-energize ordering.

use crate::error::{ProbeError, Result};
use crate::flags::Flag;
use crate::hardware::{Channel, ChannelKind, Component, ComponentKind, HardwareFactory, Reading};
use crate::probe::ProbeKind;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Parameters of the simulated plasma.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlasmaModel {
    /// Electron temperature (eV)
    pub electron_temperature_ev: f64,
    /// Plasma potential (V)
    pub plasma_potential: f64,
    /// Ion saturation current (A)
    pub ion_saturation_current: f64,
    /// Electron saturation current (A)
    pub electron_saturation_current: f64,
    /// Ion temperature seen by the energy analyzer (eV)
    pub ion_temperature_ev: f64,
    /// Beam energy seen by the energy analyzer (eV)
    pub beam_energy_ev: f64,
    /// Peak-to-peak uniform noise added to every sense reading (V)
    pub noise_volts: f64,
    /// Noise generator seed
    pub seed: u64,
}

impl Default for PlasmaModel {
    fn default() -> Self {
        Self {
            electron_temperature_ev: 3.0,
            plasma_potential: 10.0,
            ion_saturation_current: 0.5e-3,
            electron_saturation_current: 20e-3,
            ion_temperature_ev: 0.5,
            beam_energy_ev: 20.0,
            noise_volts: 0.0,
            seed: 42,
        }
    }
}

impl PlasmaModel {
    /// Bias at which the single-probe current crosses zero.
    pub fn floating_potential(&self) -> f64 {
        self.plasma_potential
            + self.electron_temperature_ev
                * (self.ion_saturation_current / self.electron_saturation_current).ln()
    }

    /// Probe current (A, electron current positive) at `bias`.
    pub fn current(&self, kind: ProbeKind, bias: f64) -> f64 {
        let te = self.electron_temperature_ev;
        match kind {
            ProbeKind::SingleLangmuir => {
                if bias < self.plasma_potential {
                    -self.ion_saturation_current
                        + self.electron_saturation_current
                            * ((bias - self.plasma_potential) / te).exp()
                } else {
                    self.electron_saturation_current - self.ion_saturation_current
                }
            }
            ProbeKind::DoubleLangmuir => self.ion_saturation_current * (bias / (2.0 * te)).tanh(),
            ProbeKind::TripleLangmuir => {
                let vd2 = self.triple_floating_difference(bias);
                self.ion_saturation_current * ((vd2 / te).exp() - 1.0)
            }
            ProbeKind::EnergyAnalyzer => {
                self.ion_saturation_current
                    / (1.0 + ((bias - self.beam_energy_ev) / self.ion_temperature_ev).exp())
            }
        }
    }

    /// Floating voltage difference `V_d2` of a triple probe held at `V_d3 = bias`.
    pub fn triple_floating_difference(&self, bias: f64) -> f64 {
        let te = self.electron_temperature_ev;
        -te * (1.0 - 0.5 * (1.0 - (-bias / te).exp())).ln()
    }
}

/// What a mock sense channel measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSense {
    /// Voltage across the current shunt
    Shunt,
    /// Floating voltage difference between triple probe tips
    FloatingDifference,
}

/// A journaled hardware write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HardwareAction {
    /// Relay closed (probe connected)
    RelayClosed,
    /// Relay opened
    RelayOpened,
    /// Amplifier output driven to the given value
    AmplifierSet(f64),
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareEvent {
    /// Device address
    pub address: String,
    /// What was written
    pub action: HardwareAction,
    /// State of the observed `operating` flag, if one is attached
    pub operating: Option<bool>,
}

/// Append-only record of hardware writes.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<HardwareEvent>>>);

impl Journal {
    fn record(&self, event: HardwareEvent) {
        self.0.lock().push(event);
    }

    /// Copy of every entry, oldest first.
    pub fn events(&self) -> Vec<HardwareEvent> {
        self.0.lock().clone()
    }

    /// Relay entries only.
    pub fn relay_events(&self) -> Vec<HardwareEvent> {
        self.0
            .lock()
            .iter()
            .filter(|e| {
                matches!(
                    e.action,
                    HardwareAction::RelayClosed | HardwareAction::RelayOpened
                )
            })
            .cloned()
            .collect()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Failures to inject.
#[derive(Debug, Clone, Default)]
struct FaultPlan {
    fail_reads_after: Option<u64>,
    panic_reads_after: Option<u64>,
    fail_relay_close: bool,
    fail_relay_open: bool,
    panic_on_amplifier_zero: bool,
}

#[derive(Debug)]
struct MockShared {
    bias: Mutex<f64>,
    relays: Mutex<BTreeMap<String, bool>>,
    journal: Journal,
    operating: Mutex<Option<Flag>>,
    faults: Mutex<FaultPlan>,
    reads: AtomicU64,
    rng: Mutex<StdRng>,
}

impl MockShared {
    fn operating(&self) -> Option<bool> {
        self.operating.lock().as_ref().map(Flag::is_set)
    }
}

#[derive(Debug, Clone, Copy)]
struct Circuit {
    kind: ProbeKind,
    model: PlasmaModel,
    shunt_resistance: f64,
    sense_gain: f64,
}

/// [`HardwareFactory`] producing simulated devices.
///
/// Cloning yields a handle on the same simulated bench, so a test can keep one
/// clone to inspect the journal while the engine owns another.
#[derive(Debug, Clone)]
pub struct MockHardwareFactory {
    circuit: Circuit,
    amplifier_gain: f64,
    senses: BTreeMap<String, MockSense>,
    shared: Arc<MockShared>,
}

impl MockHardwareFactory {
    /// Simulate `kind` in `model`. Channel `ai0` senses the shunt and `ai1` the
    /// floating difference; unit gains and a 100 Ω shunt.
    pub fn new(kind: ProbeKind, model: PlasmaModel) -> Self {
        let mut senses = BTreeMap::new();
        senses.insert("ai0".to_string(), MockSense::Shunt);
        senses.insert("ai1".to_string(), MockSense::FloatingDifference);
        Self {
            circuit: Circuit {
                kind,
                model,
                shunt_resistance: 100.0,
                sense_gain: 1.0,
            },
            amplifier_gain: 1.0,
            senses,
            shared: Arc::new(MockShared {
                bias: Mutex::new(0.0),
                relays: Mutex::new(BTreeMap::new()),
                journal: Journal::default(),
                operating: Mutex::new(None),
                faults: Mutex::new(FaultPlan::default()),
                reads: AtomicU64::new(0),
                rng: Mutex::new(StdRng::seed_from_u64(model.seed)),
            }),
        }
    }

    /// Set the simulated shunt resistance (Ω).
    pub fn with_shunt_resistance(mut self, ohms: f64) -> Self {
        self.circuit.shunt_resistance = ohms;
        self
    }

    /// Set the simulated amplifier and sense gains.
    pub fn with_gains(mut self, amplifier_gain: f64, sense_gain: f64) -> Self {
        self.amplifier_gain = amplifier_gain;
        self.circuit.sense_gain = sense_gain;
        self
    }

    /// Wire a sense channel at `address`.
    pub fn with_sense(mut self, address: &str, sense: MockSense) -> Self {
        self.senses.insert(address.to_string(), sense);
        self
    }

    /// Record the state of `flag` alongside every journaled write.
    pub fn observe_operating(&self, flag: &Flag) {
        *self.shared.operating.lock() = Some(flag.clone());
    }

    /// Fail every channel read after `reads` successful ones.
    pub fn fail_reads_after(&self, reads: u64) {
        self.shared.faults.lock().fail_reads_after = Some(reads);
    }

    /// Panic on every channel read after `reads` successful ones.
    pub fn panic_reads_after(&self, reads: u64) {
        self.shared.faults.lock().panic_reads_after = Some(reads);
    }

    /// Make relay closing fail.
    pub fn fail_relay_close(&self) {
        self.shared.faults.lock().fail_relay_close = true;
    }

    /// Panic when the amplifier is driven to zero.
    pub fn panic_on_amplifier_zero(&self) {
        self.shared.faults.lock().panic_on_amplifier_zero = true;
    }

    /// Make relay opening fail.
    pub fn fail_relay_open(&self, fail: bool) {
        self.shared.faults.lock().fail_relay_open = fail;
    }

    /// Write journal.
    pub fn journal(&self) -> Journal {
        self.shared.journal.clone()
    }

    /// Bias currently applied at the probe tip.
    pub fn applied_bias(&self) -> f64 {
        *self.shared.bias.lock()
    }

    /// Whether any relay is closed.
    pub fn any_relay_closed(&self) -> bool {
        self.shared.relays.lock().values().any(|closed| *closed)
    }

    /// Successful channel reads so far.
    pub fn reads(&self) -> u64 {
        self.shared.reads.load(Ordering::Relaxed)
    }
}

impl HardwareFactory for MockHardwareFactory {
    fn make_channel(&self, address: &str, kind: ChannelKind) -> Result<Box<dyn Channel>> {
        if kind != ChannelKind::AnalogInput {
            return Err(ProbeError::hardware(
                address,
                format!("mock only provides analog inputs, not {kind:?}"),
            ));
        }
        let sense = self
            .senses
            .get(address)
            .copied()
            .ok_or_else(|| ProbeError::hardware(address, "no such mock channel"))?;
        Ok(Box::new(MockChannel {
            address: address.to_string(),
            sense,
            circuit: self.circuit,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn make_component(&self, kind: ComponentKind, address: &str) -> Result<Box<dyn Component>> {
        match kind {
            ComponentKind::Relay => {
                self.shared.relays.lock().insert(address.to_string(), false);
                Ok(Box::new(MockRelay {
                    address: address.to_string(),
                    shared: Arc::clone(&self.shared),
                }))
            }
            ComponentKind::Amplifier => Ok(Box::new(MockAmplifier {
                address: address.to_string(),
                gain: self.amplifier_gain,
                output: 0.0,
                shared: Arc::clone(&self.shared),
            })),
        }
    }
}

struct MockRelay {
    address: String,
    shared: Arc<MockShared>,
}

impl Component for MockRelay {
    fn address(&self) -> &str {
        &self.address
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Relay
    }

    fn read(&mut self) -> Result<Reading> {
        let closed = self
            .shared
            .relays
            .lock()
            .get(&self.address)
            .copied()
            .unwrap_or(false);
        Ok(Reading::Digital(closed))
    }

    fn write(&mut self, value: Reading) -> Result<()> {
        let Reading::Digital(close) = value else {
            return Err(ProbeError::hardware(&self.address, "relay expects a digital value"));
        };
        let faults = self.shared.faults.lock().clone();
        if close && faults.fail_relay_close {
            return Err(ProbeError::hardware(&self.address, "relay stuck open"));
        }
        if !close && faults.fail_relay_open {
            return Err(ProbeError::hardware(&self.address, "relay stuck closed"));
        }
        self.shared
            .relays
            .lock()
            .insert(self.address.clone(), close);
        self.shared.journal.record(HardwareEvent {
            address: self.address.clone(),
            action: if close {
                HardwareAction::RelayClosed
            } else {
                HardwareAction::RelayOpened
            },
            operating: self.shared.operating(),
        });
        Ok(())
    }
}

struct MockAmplifier {
    address: String,
    gain: f64,
    output: f64,
    shared: Arc<MockShared>,
}

impl Component for MockAmplifier {
    fn address(&self) -> &str {
        &self.address
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Amplifier
    }

    fn read(&mut self) -> Result<Reading> {
        Ok(Reading::Analog(self.output))
    }

    #[allow(clippy::panic)]
    fn write(&mut self, value: Reading) -> Result<()> {
        let Reading::Analog(output) = value else {
            return Err(ProbeError::hardware(&self.address, "amplifier expects an analog value"));
        };
        if output == 0.0 && self.shared.faults.lock().panic_on_amplifier_zero {
            panic!("mock amplifier {} panicked while zeroing", self.address);
        }
        self.output = output;
        *self.shared.bias.lock() = output * self.gain;
        self.shared.journal.record(HardwareEvent {
            address: self.address.clone(),
            action: HardwareAction::AmplifierSet(output),
            operating: self.shared.operating(),
        });
        Ok(())
    }
}

struct MockChannel {
    address: String,
    sense: MockSense,
    circuit: Circuit,
    shared: Arc<MockShared>,
}

impl MockChannel {
    #[allow(clippy::panic)]
    fn check_faults(&self) -> Result<()> {
        let reads = self.shared.reads.load(Ordering::Relaxed);
        let faults = self.shared.faults.lock().clone();
        if faults.panic_reads_after.is_some_and(|limit| reads >= limit) {
            panic!("mock channel {} panicked after {reads} reads", self.address);
        }
        if faults.fail_reads_after.is_some_and(|limit| reads >= limit) {
            return Err(ProbeError::hardware(&self.address, "read failed"));
        }
        Ok(())
    }

    fn noise(&self) -> f64 {
        let amplitude = self.circuit.model.noise_volts / 2.0;
        if amplitude > 0.0 {
            self.shared.rng.lock().gen_range(-amplitude..=amplitude)
        } else {
            0.0
        }
    }
}

impl Channel for MockChannel {
    fn address(&self) -> &str {
        &self.address
    }

    fn read(&mut self) -> Result<Reading> {
        self.check_faults()?;
        let bias = *self.shared.bias.lock();
        let Circuit {
            kind,
            model,
            shunt_resistance,
            sense_gain,
        } = self.circuit;
        let volts = match self.sense {
            MockSense::Shunt => model.current(kind, bias) * shunt_resistance,
            MockSense::FloatingDifference => model.triple_floating_difference(bias),
        };
        self.shared.reads.fetch_add(1, Ordering::Relaxed);
        Ok(Reading::Analog(volts * sense_gain + self.noise()))
    }

    fn write(&mut self, _value: Reading) -> Result<()> {
        Err(ProbeError::hardware(&self.address, "input channel is read-only"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_probe_floating_potential() {
        let model = PlasmaModel::default();
        let vf = model.floating_potential();
        assert!(model.current(ProbeKind::SingleLangmuir, vf).abs() < 1e-12);
        assert!(model.current(ProbeKind::SingleLangmuir, vf - 1.0) < 0.0);
        assert!(model.current(ProbeKind::SingleLangmuir, vf + 1.0) > 0.0);
    }

    #[test]
    fn test_amplifier_drives_shunt_reading() {
        let factory = MockHardwareFactory::new(ProbeKind::DoubleLangmuir, PlasmaModel::default())
            .with_gains(10.0, 2.0);
        let mut amplifier = factory
            .make_component(ComponentKind::Amplifier, "ao0")
            .unwrap();
        let mut shunt = factory.make_channel("ai0", ChannelKind::AnalogInput).unwrap();

        amplifier.write(Reading::Analog(0.5)).unwrap();
        assert!((factory.applied_bias() - 5.0).abs() < 1e-12);

        let expected = PlasmaModel::default().current(ProbeKind::DoubleLangmuir, 5.0) * 100.0 * 2.0;
        let reading = shunt.read().unwrap().as_f64();
        assert!((reading - expected).abs() < 1e-12);
        assert_eq!(factory.reads(), 1);
    }

    #[test]
    fn test_journal_records_operating_state() {
        let factory = MockHardwareFactory::new(ProbeKind::SingleLangmuir, PlasmaModel::default());
        let operating = Flag::new();
        factory.observe_operating(&operating);
        let mut relay = factory.make_component(ComponentKind::Relay, "do0").unwrap();

        operating.set();
        relay.write(Reading::Digital(true)).unwrap();
        assert!(factory.any_relay_closed());
        relay.write(Reading::Digital(false)).unwrap();
        operating.clear();

        let events = factory.journal().relay_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, HardwareAction::RelayClosed);
        assert!(events.iter().all(|e| e.operating == Some(true)));
        assert!(!factory.any_relay_closed());
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let factory = MockHardwareFactory::new(ProbeKind::SingleLangmuir, PlasmaModel::default());
        let err = factory
            .make_channel("ai7", ChannelKind::AnalogInput)
            .err()
            .unwrap();
        assert!(err.is_hardware());
    }

    #[test]
    fn test_read_fault_injection() {
        let factory = MockHardwareFactory::new(ProbeKind::SingleLangmuir, PlasmaModel::default());
        let mut shunt = factory.make_channel("ai0", ChannelKind::AnalogInput).unwrap();
        factory.fail_reads_after(2);
        assert!(shunt.read().is_ok());
        assert!(shunt.read().is_ok());
        assert!(shunt.read().is_err());
    }

    #[test]
    fn test_relay_fault_injection() {
        let factory = MockHardwareFactory::new(ProbeKind::SingleLangmuir, PlasmaModel::default());
        let mut relay = factory.make_component(ComponentKind::Relay, "do0").unwrap();
        factory.fail_relay_close();
        assert!(relay.write(Reading::Digital(true)).is_err());
        assert!(factory.journal().events().is_empty());
    }

    #[test]
    fn test_amplifier_zero_panic_injection() {
        let factory = MockHardwareFactory::new(ProbeKind::TripleLangmuir, PlasmaModel::default());
        let mut amplifier = factory
            .make_component(ComponentKind::Amplifier, "ao0")
            .unwrap();
        factory.panic_on_amplifier_zero();
        amplifier.write(Reading::Analog(2.0)).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            amplifier.write(Reading::Analog(0.0))
        }));
        assert!(result.is_err());
        assert!((factory.applied_bias() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_noise_is_bounded() {
        let model = PlasmaModel {
            noise_volts: 0.2,
            ..PlasmaModel::default()
        };
        let factory = MockHardwareFactory::new(ProbeKind::DoubleLangmuir, model);
        let mut shunt = factory.make_channel("ai0", ChannelKind::AnalogInput).unwrap();
        for _ in 0..100 {
            // Zero bias: the noiseless reading is exactly zero.
            assert!(shunt.read().unwrap().as_f64().abs() <= 0.1);
        }
    }
}
