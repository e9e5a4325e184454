//! Hardware abstractions for probe wiring.
//!
//! A probe is wired through three kinds of hardware:
//! - relays connecting the probe tips to the measurement circuit,
//! - a bias amplifier driven by an analog output,
//! - analog input channels sensing the probe response.
//!
//! Concrete devices come from a [`HardwareFactory`]. [`ProbeHardware`] resolves the
//! whole set for one probe at setup time and owns it for the life of the probe
//! thread, so nothing here needs interior locking.

pub mod mock;

use crate::error::{ProbeError, Result};
use crate::probe::settings::ProbeSettings;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Channel role sensing the voltage across the current shunt.
pub const ROLE_SHUNT: &str = "shunt";
/// Channel role sensing the floating voltage difference (triple probe).
pub const ROLE_FLOATING: &str = "floating";

/// A value read from or written to a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Voltage or any other analog quantity
    Analog(f64),
    /// Relay state or digital line level
    Digital(bool),
}

impl Reading {
    /// Analog value, or NaN for a digital reading.
    pub fn as_f64(&self) -> f64 {
        match self {
            Reading::Analog(v) => *v,
            Reading::Digital(_) => f64::NAN,
        }
    }
}

/// Direction and type of an I/O channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Analog input
    AnalogInput,
    /// Analog output
    AnalogOutput,
    /// Digital input
    DigitalInput,
    /// Digital output
    DigitalOutput,
}

/// Role of a component in the probe circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// Connects a probe tip to the circuit
    Relay,
    /// Drives the probe bias
    Amplifier,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Relay => write!(f, "relay"),
            ComponentKind::Amplifier => write!(f, "amplifier"),
        }
    }
}

/// A raw I/O channel.
pub trait Channel: Send {
    /// Hardware address (e.g. `ai0`).
    fn address(&self) -> &str;

    /// Read the current value.
    fn read(&mut self) -> Result<Reading>;

    /// Write a value.
    fn write(&mut self, value: Reading) -> Result<()>;
}

/// A relay or amplifier built on top of a channel.
pub trait Component: Send {
    /// Hardware address of the underlying channel.
    fn address(&self) -> &str;

    /// Role in the probe circuit.
    fn kind(&self) -> ComponentKind;

    /// Read the current state.
    fn read(&mut self) -> Result<Reading>;

    /// Drive the component.
    fn write(&mut self, value: Reading) -> Result<()>;
}

/// Creates channels and components from configuration addresses.
pub trait HardwareFactory: Send + Sync {
    /// Open a raw channel.
    fn make_channel(&self, address: &str, kind: ChannelKind) -> Result<Box<dyn Channel>>;

    /// Open a relay or amplifier.
    fn make_component(&self, kind: ComponentKind, address: &str) -> Result<Box<dyn Component>>;
}

/// Every device one probe uses, resolved from its settings.
pub struct ProbeHardware {
    probe_id: String,
    relays: Vec<Box<dyn Component>>,
    amplifier: Box<dyn Component>,
    channels: BTreeMap<String, Box<dyn Channel>>,
    amplifier_gain: f64,
}

impl ProbeHardware {
    /// Open the relays, amplifier and sense channels named in `settings`.
    ///
    /// Nothing is energized here; a wiring error surfaces before any output moves.
    pub fn resolve(factory: &dyn HardwareFactory, settings: &ProbeSettings) -> Result<Self> {
        let relays = settings
            .relays
            .iter()
            .map(|address| factory.make_component(ComponentKind::Relay, address))
            .collect::<Result<Vec<_>>>()?;
        let amplifier = factory.make_component(ComponentKind::Amplifier, &settings.amplifier)?;

        let mut channels = BTreeMap::new();
        for (role, address) in &settings.channels {
            let channel = factory.make_channel(address, ChannelKind::AnalogInput)?;
            channels.insert(role.clone(), channel);
        }

        for role in settings.kind.required_channels() {
            if !channels.contains_key(*role) {
                return Err(ProbeError::Configuration(format!(
                    "Probe '{}' has no '{role}' channel",
                    settings.probe_id
                )));
            }
        }

        debug!(
            probe_id = %settings.probe_id,
            relays = relays.len(),
            channels = channels.len(),
            "Resolved probe hardware"
        );

        Ok(Self {
            probe_id: settings.probe_id.clone(),
            relays,
            amplifier,
            channels,
            amplifier_gain: settings.amplifier_gain,
        })
    }

    /// Close every relay, in configuration order.
    pub fn enable_relays(&mut self) -> Result<()> {
        for relay in &mut self.relays {
            relay.write(Reading::Digital(true))?;
        }
        Ok(())
    }

    /// Open every relay.
    ///
    /// Attempts all of them even after a failure and reports the first error.
    pub fn disable_relays(&mut self) -> Result<()> {
        let mut first_error = None;
        for relay in &mut self.relays {
            if let Err(e) = relay.write(Reading::Digital(false)) {
                warn!(probe_id = %self.probe_id, relay = relay.address(), error = %e, "Relay did not open");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drive the amplifier output to zero.
    pub fn zero_outputs(&mut self) -> Result<()> {
        self.amplifier.write(Reading::Analog(0.0))
    }

    /// Apply `volts` at the probe tip (the amplifier gain is divided out).
    pub fn set_bias(&mut self, volts: f64) -> Result<()> {
        self.amplifier
            .write(Reading::Analog(volts / self.amplifier_gain))
    }

    /// Raw reading of the channel wired to `role`, in volts at the input.
    pub fn read_role(&mut self, role: &str) -> Result<f64> {
        let channel = self.channels.get_mut(role).ok_or_else(|| {
            ProbeError::Configuration(format!(
                "Probe '{}' has no '{role}' channel",
                self.probe_id
            ))
        })?;
        Ok(channel.read()?.as_f64())
    }
}

impl fmt::Debug for ProbeHardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeHardware")
            .field("probe_id", &self.probe_id)
            .field("relays", &self.relays.len())
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}
