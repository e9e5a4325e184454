//! Probe threads: one producer per physical probe.
//!
//! A [`ProbeThread`] owns the probe's hardware for its whole life:
//!
//! ```text
//! Created -> Armed -> Sampling -> Draining -> Terminated
//! ```
//!
//! - `build` resolves the wiring (Armed). Nothing is energized.
//! - `start` spawns the worker. It raises `operating`, closes the relays, waits
//!   the settle delay and samples while [`SystemFlags::should_sample`] holds.
//! - On leaving the loop for any reason (diagnose cleared, shutdown, emergency,
//!   sample limit, hardware error or panic) the worker zeroes the amplifier, opens
//!   the relays, waits the settle delay and only then clears `operating`.
//!
//! Samples go to the consumer through a bounded [`HandoffQueue`]; a full queue
//! never stalls the sampling loop longer than the configured backpressure bound.

pub mod driver;
pub mod queue;
pub mod settings;

use crate::error::{ProbeError, Result};
use crate::flags::{Flag, SystemFlags};
use crate::hardware::{HardwareFactory, ProbeHardware, ROLE_FLOATING, ROLE_SHUNT};
use crate::record::SampleRecord;
use crate::report::Reporter;
use driver::Acquisition;
use parking_lot::Mutex;
use queue::{BackpressurePolicy, HandoffQueue, PushOutcome};
use serde::{Deserialize, Serialize};
use settings::{ProbeSettings, SweepSettings};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// How long a paced loop waits for a clock tick before re-checking its flags.
const PACING_POLL: Duration = Duration::from_millis(100);

/// Supported probe types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Single Langmuir probe, swept
    SingleLangmuir,
    /// Double Langmuir probe, swept
    DoubleLangmuir,
    /// Triple Langmuir probe, fixed bias
    TripleLangmuir,
    /// Retarding-field energy analyzer, swept discriminator
    EnergyAnalyzer,
}

impl ProbeKind {
    /// Whether the probe sweeps its bias.
    pub fn is_sweeping(&self) -> bool {
        !matches!(self, ProbeKind::TripleLangmuir)
    }

    /// Channel roles the probe reads.
    pub fn required_channels(&self) -> &'static [&'static str] {
        match self {
            ProbeKind::TripleLangmuir => &[ROLE_FLOATING, ROLE_SHUNT],
            _ => &[ROLE_SHUNT],
        }
    }

    /// Sweep used when the configuration gives none.
    pub fn default_sweep(&self) -> SweepSettings {
        let (start, stop) = match self {
            ProbeKind::EnergyAnalyzer => (0.0, 40.0),
            _ => (-30.0, 30.0),
        };
        SweepSettings {
            start,
            stop,
            steps: 121,
            samples_per_point: 1,
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeKind::SingleLangmuir => "single_langmuir",
            ProbeKind::DoubleLangmuir => "double_langmuir",
            ProbeKind::TripleLangmuir => "triple_langmuir",
            ProbeKind::EnergyAnalyzer => "energy_analyzer",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a probe thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Constructed, hardware not yet resolved
    Created,
    /// Hardware resolved, worker not started
    Armed,
    /// Energized and sampling
    Sampling,
    /// Left the loop, de-energizing
    Draining,
    /// Worker finished
    Terminated,
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeState::Created => "created",
            ProbeState::Armed => "armed",
            ProbeState::Sampling => "sampling",
            ProbeState::Draining => "draining",
            ProbeState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Per-run knobs of a probe thread.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Full-queue behaviour
    pub backpressure: BackpressurePolicy,
    /// Relay settle delay, after enabling and after disabling
    pub settle_delay: Duration,
    /// Stop sampling after this many samples
    pub max_samples: Option<u64>,
    /// Clock trigger; when present one sample is taken per tick
    pub pacing: Option<Flag>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            backpressure: BackpressurePolicy::DropNewest,
            settle_delay: Duration::from_secs(3),
            max_samples: None,
            pacing: None,
        }
    }
}

/// How a probe worker ended.
#[derive(Debug, Default)]
pub struct ProbeExit {
    /// Samples accepted by the queue
    pub samples_produced: u64,
    /// Samples discarded on a full queue
    pub samples_dropped: u64,
    /// Sampling error or panic that ended the loop early
    pub failure: Option<ProbeError>,
    /// De-energizing error; `operating` stays set if the relays did not open
    pub cleanup_failure: Option<ProbeError>,
}

impl ProbeExit {
    /// Whether the worker ended without any error.
    pub fn is_clean(&self) -> bool {
        self.failure.is_none() && self.cleanup_failure.is_none()
    }
}

#[derive(Debug, Default)]
struct ProbeCounters {
    produced: AtomicU64,
    dropped: AtomicU64,
}

/// Sets the done flag when the worker leaves, even by unwinding.
struct DoneGuard(Flag);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// Producer thread for one probe.
pub struct ProbeThread {
    settings: Arc<ProbeSettings>,
    state: Arc<Mutex<ProbeState>>,
    worker: Option<ProbeWorker>,
    handle: Option<JoinHandle<ProbeExit>>,
    done: Flag,
    counters: Arc<ProbeCounters>,
}

impl ProbeThread {
    /// Resolve the probe's hardware and arm it.
    ///
    /// Fails without touching any output if the wiring cannot be resolved.
    pub fn build(
        settings: ProbeSettings,
        factory: &dyn HardwareFactory,
        flags: SystemFlags,
        queue: HandoffQueue<SampleRecord>,
        options: ProbeOptions,
        reporter: Reporter,
    ) -> Result<Self> {
        let state = Arc::new(Mutex::new(ProbeState::Created));
        let hardware = ProbeHardware::resolve(factory, &settings)?;
        let settings = Arc::new(settings);
        let counters = Arc::new(ProbeCounters::default());
        let done = Flag::new();

        let worker = ProbeWorker {
            source: format!("probe:{}", settings.probe_id),
            acquisition: Acquisition::for_settings(&settings),
            settings: Arc::clone(&settings),
            hardware,
            flags,
            queue,
            options,
            reporter,
            state: Arc::clone(&state),
            counters: Arc::clone(&counters),
        };
        *state.lock() = ProbeState::Armed;
        debug!(probe_id = %settings.probe_id, kind = %settings.kind, "Probe armed");

        Ok(Self {
            settings,
            state,
            worker: Some(worker),
            handle: None,
            done,
            counters,
        })
    }

    /// Probe identifier.
    pub fn probe_id(&self) -> &str {
        &self.settings.probe_id
    }

    /// Probe type.
    pub fn kind(&self) -> ProbeKind {
        self.settings.kind
    }

    /// Resolved settings.
    pub fn settings(&self) -> &Arc<ProbeSettings> {
        &self.settings
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProbeState {
        *self.state.lock()
    }

    /// Armed and not yet started.
    pub fn is_ready(&self) -> bool {
        self.worker.is_some() && self.state() == ProbeState::Armed
    }

    /// Whether the worker has finished, cleanup included.
    pub fn is_finished(&self) -> bool {
        self.done.is_set()
    }

    /// Flag set once the worker has finished.
    pub fn done_flag(&self) -> Flag {
        self.done.clone()
    }

    /// Samples accepted by the queue so far.
    pub fn samples_produced(&self) -> u64 {
        self.counters.produced.load(Ordering::Relaxed)
    }

    /// Samples discarded on a full queue so far.
    pub fn samples_dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Spawn the worker thread.
    pub fn start(&mut self) -> Result<()> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| ProbeError::lifecycle("start probe", self.state()))?;
        let done = self.done.clone();
        let handle = thread::Builder::new()
            .name(format!("probe-{}", self.settings.probe_id))
            .spawn(move || {
                let _done = DoneGuard(done);
                worker.run()
            })?;
        self.handle = Some(handle);
        info!(probe_id = %self.settings.probe_id, "Probe thread started");
        Ok(())
    }

    /// Wait up to `timeout` for the worker to finish.
    ///
    /// On timeout the handle is kept so a later call can retry.
    pub fn join(&mut self, timeout: Duration) -> Result<ProbeExit> {
        if self.handle.is_none() {
            return Err(ProbeError::lifecycle("join probe", self.state()));
        }
        if !self.done.wait(timeout) {
            return Err(ProbeError::JoinTimeout {
                name: format!("probe-{}", self.settings.probe_id),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }
        let handle = self
            .handle
            .take()
            .ok_or_else(|| ProbeError::lifecycle("join probe", self.state()))?;
        handle
            .join()
            .map_err(|payload| ProbeError::ThreadPanicked(panic_message(payload.as_ref())))
    }
}

impl fmt::Debug for ProbeThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeThread")
            .field("probe_id", &self.settings.probe_id)
            .field("kind", &self.settings.kind)
            .field("state", &self.state())
            .finish()
    }
}

struct ProbeWorker {
    source: String,
    settings: Arc<ProbeSettings>,
    acquisition: Acquisition,
    hardware: ProbeHardware,
    flags: SystemFlags,
    queue: HandoffQueue<SampleRecord>,
    options: ProbeOptions,
    reporter: Reporter,
    state: Arc<Mutex<ProbeState>>,
    counters: Arc<ProbeCounters>,
}

impl ProbeWorker {
    fn run(mut self) -> ProbeExit {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.energize_and_sample()));
        self.set_state(ProbeState::Draining);

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                self.reporter
                    .error(&self.source, &format!("Sampling stopped: {e}"));
                Some(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.reporter
                    .error(&self.source, &format!("Sampling panicked: {message}"));
                Some(ProbeError::ThreadPanicked(format!(
                    "probe-{}: {message}",
                    self.settings.probe_id
                )))
            }
        };

        let cleanup_failure = self.de_energize().err();
        self.set_state(ProbeState::Terminated);

        let exit = ProbeExit {
            samples_produced: self.counters.produced.load(Ordering::Relaxed),
            samples_dropped: self.counters.dropped.load(Ordering::Relaxed),
            failure,
            cleanup_failure,
        };
        info!(
            probe_id = %self.settings.probe_id,
            produced = exit.samples_produced,
            dropped = exit.samples_dropped,
            clean = exit.is_clean(),
            "Probe thread finished"
        );
        exit
    }

    fn energize_and_sample(&mut self) -> Result<()> {
        self.flags.status.operating.set();
        self.reporter.info(&self.source, "Enabling relays");
        self.hardware.enable_relays()?;
        // Shutdown cuts the settle short; the loop condition then fails at once.
        self.flags.command.wait_shutdown(self.options.settle_delay);
        self.set_state(ProbeState::Sampling);
        self.sample_loop()
    }

    fn sample_loop(&mut self) -> Result<()> {
        let mut sequence = 0u64;
        while self.flags.should_sample() {
            if let Some(trigger) = &self.options.pacing {
                if !trigger.wait(PACING_POLL) {
                    continue;
                }
                trigger.clear();
                if !self.flags.should_sample() {
                    break;
                }
            }

            let mut sample = SampleRecord::new(sequence, Arc::clone(&self.settings));
            if !self
                .acquisition
                .acquire(&mut self.hardware, &self.flags, &mut sample)?
            {
                debug!(probe_id = %self.settings.probe_id, sequence, "Sweep interrupted");
                break;
            }
            sequence += 1;

            match self.queue.push(sample, self.options.backpressure) {
                PushOutcome::Enqueued => {
                    self.counters.produced.fetch_add(1, Ordering::Relaxed);
                }
                PushOutcome::Dropped => {
                    let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 {
                        self.reporter
                            .warn(&self.source, "Hand-off queue full, dropping samples");
                    }
                    trace!(probe_id = %self.settings.probe_id, dropped, "Sample dropped");
                }
            }

            if self.options.max_samples.is_some_and(|max| sequence >= max) {
                debug!(probe_id = %self.settings.probe_id, sequence, "Sample limit reached");
                break;
            }
        }
        Ok(())
    }

    /// Zero the amplifier, open the relays, settle, then clear `operating`.
    ///
    /// Each step runs on its own, so the relays are opened even when zeroing fails
    /// or panics. If the relays did not open `operating` stays set and `emergency`
    /// is raised; a panic in either step raises `emergency` as well.
    fn de_energize(&mut self) -> Result<()> {
        let name = format!("probe-{}", self.settings.probe_id);
        let hardware = &mut self.hardware;
        let zeroed = contain_panic(&name, "zeroing the amplifier", || hardware.zero_outputs());
        let opened = contain_panic(&name, "opening the relays", || hardware.disable_relays());
        if [&zeroed, &opened]
            .iter()
            .any(|r| matches!(r, Err(ProbeError::ThreadPanicked(_))))
        {
            self.flags.command.emergency.set();
        }
        thread::sleep(self.options.settle_delay);

        if let Err(e) = opened {
            error!(
                probe_id = %self.settings.probe_id,
                error = %e,
                "Relays did not open; probe may still be energized"
            );
            self.flags.command.emergency.set();
            return Err(e);
        }
        self.flags.status.operating.clear();
        self.reporter.info(&self.source, "Relays disabled");

        if let Err(e) = &zeroed {
            warn!(probe_id = %self.settings.probe_id, error = %e, "Amplifier did not zero");
        }
        zeroed
    }

    fn set_state(&self, state: ProbeState) {
        *self.state.lock() = state;
    }
}

/// Run one cleanup step, turning a panic into [`ProbeError::ThreadPanicked`].
fn contain_panic(name: &str, step: &str, f: impl FnOnce() -> Result<()>) -> Result<()> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!(thread = name, step, panic = %message, "Cleanup step panicked");
        Err(ProbeError::ThreadPanicked(format!("{name}: {step}: {message}")))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
