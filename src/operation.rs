//! Producer/consumer orchestration for one probe.
//!
//! [`ProbeOperation`] arms a [`ProbeThread`] at setup, and on start launches it
//! together with a consumer thread that pulls samples from the hand-off queue,
//! runs them through the probe's [`CalculationPipeline`], overwrites the display
//! board and aggregates the resulting [`ParameterRecord`]s. On stop the aggregate
//! is sent upward as a [`RunOutcome`].
//!
//! ```text
//! Idle -> Armed -> Running -> Stopping -> Idle
//!   \________\________\_________\______-> Terminated (shutdown)
//! ```

use crate::clock::ClockThread;
use crate::config::{ConfigManager, RunConfig};
use crate::diagnostics::DisplayBoard;
use crate::error::{ProbeError, Result};
use crate::flags::{Flag, SystemFlags};
use crate::hardware::HardwareFactory;
use crate::pipeline::CalculationPipeline;
use crate::probe::queue::HandoffQueue;
use crate::probe::settings::ProbeSettings;
use crate::probe::{ProbeExit, ProbeOptions, ProbeThread};
use crate::record::{ParameterRecord, SampleRecord};
use crate::report::Reporter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle state of a [`ProbeOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Nothing armed
    Idle,
    /// Probe built and wired, not started
    Armed,
    /// Probe and consumer running
    Running,
    /// Stop requested and not yet completed
    Stopping,
    /// Shut down for good
    Terminated,
}

impl OperationState {
    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Idle => "idle",
            OperationState::Armed => "armed",
            OperationState::Running => "running",
            OperationState::Stopping => "stopping",
            OperationState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every sample was processed and the probe was de-energized cleanly
    Completed,
    /// The run ended abnormally; the records gathered before are still reported
    Failed(String),
}

impl RunStatus {
    /// Whether the run completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

/// Aggregate of one run, as delivered on the results channel.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Probe the run used
    pub probe_id: String,
    /// When `start()` succeeded
    pub started_at: DateTime<Utc>,
    /// When the run was stopped
    pub stopped_at: DateTime<Utc>,
    /// Samples discarded on a full queue
    pub samples_dropped: u64,
    /// Every record the consumer produced, in sequence order
    pub records: Vec<ParameterRecord>,
    /// Completion status
    pub status: RunStatus,
}

/// Short account of a finished run returned by `stop()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Probe the run used
    pub probe_id: String,
    /// Records aggregated
    pub records: usize,
    /// Samples accepted by the queue
    pub samples_produced: u64,
    /// Samples discarded on a full queue
    pub samples_dropped: u64,
    /// Completion status
    pub status: RunStatus,
}

/// Counters over the life of an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    /// Samples accepted by the hand-off queue
    pub samples_produced: u64,
    /// Samples dropped by backpressure
    pub samples_dropped: u64,
    /// Parameter records aggregated
    pub records_aggregated: u64,
    /// Pipeline invocations that panicked
    pub pipeline_failures: u64,
    /// Runs that completed
    pub runs_completed: u64,
    /// Runs that failed
    pub runs_failed: u64,
}

#[derive(Debug, Default)]
struct OperationCounters {
    samples_produced: AtomicU64,
    samples_dropped: AtomicU64,
    records_aggregated: AtomicU64,
    pipeline_failures: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
}

impl OperationCounters {
    fn snapshot(&self) -> OperationStats {
        OperationStats {
            samples_produced: self.samples_produced.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            records_aggregated: self.records_aggregated.load(Ordering::Relaxed),
            pipeline_failures: self.pipeline_failures.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
        }
    }
}

struct ArmedRun {
    run: RunConfig,
    probe: ProbeThread,
    queue: HandoffQueue<SampleRecord>,
    pipeline: CalculationPipeline,
    pacing: Option<Flag>,
}

struct ActiveRun {
    run_id: Uuid,
    run: RunConfig,
    started_at: DateTime<Utc>,
    probe: ProbeThread,
    probe_exit: Option<ProbeExit>,
    clock: Option<ClockThread>,
    consumer: Option<JoinHandle<ConsumerExit>>,
}

/// Orchestrates one probe thread and its consumer.
pub struct ProbeOperation {
    flags: SystemFlags,
    factory: Arc<dyn HardwareFactory>,
    display: DisplayBoard,
    results: UnboundedSender<RunOutcome>,
    reporter: Reporter,
    state: OperationState,
    armed: Option<ArmedRun>,
    active: Option<ActiveRun>,
    counters: Arc<OperationCounters>,
}

impl ProbeOperation {
    /// Create an idle operation.
    pub fn new(
        flags: SystemFlags,
        factory: Arc<dyn HardwareFactory>,
        display: DisplayBoard,
        results: UnboundedSender<RunOutcome>,
        reporter: Reporter,
    ) -> Self {
        Self {
            flags,
            factory,
            display,
            results,
            reporter,
            state: OperationState::Idle,
            armed: None,
            active: None,
            counters: Arc::new(OperationCounters::default()),
        }
    }

    /// Current state.
    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Counters so far.
    pub fn stats(&self) -> OperationStats {
        self.counters.snapshot()
    }

    /// Whether diagnostics are running: started and not yet stopped.
    pub fn is_performing(&self) -> bool {
        matches!(
            self.state,
            OperationState::Running | OperationState::Stopping
        )
    }

    /// Whether the running probe has finished sampling and cleaned up.
    pub fn is_probe_finished(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.probe.is_finished())
    }

    /// Probe of the armed or running run.
    pub fn probe_id(&self) -> Option<&str> {
        match (&self.armed, &self.active) {
            (Some(armed), _) => Some(armed.run.probe_id.as_str()),
            (_, Some(active)) => Some(active.run.probe_id.as_str()),
            _ => None,
        }
    }

    /// Resolve the probe's settings, build its thread and wire the queue.
    ///
    /// Rejected while anything is armed or running and once shutdown has been
    /// requested. A rejected setup changes no flag and touches no hardware.
    pub fn setup(&mut self, config: &dyn ConfigManager, run: &RunConfig) -> Result<()> {
        if self.flags.command.is_shutdown() {
            return Err(ProbeError::ShutdownInProgress("set up a probe operation"));
        }
        if self.state != OperationState::Idle {
            return Err(ProbeError::lifecycle("set up a probe operation", self.state));
        }
        run.validate()?;

        self.flags.status.loading_config.set();
        let settings = ProbeSettings::resolve(config, &run.probe_id);
        self.flags.status.loading_config.clear();
        let settings = settings?;
        let kind = settings.kind;

        let queue = HandoffQueue::new(run.queue_capacity);
        let pacing = run.sample_rate_hz.map(|_| Flag::new());
        let options = ProbeOptions {
            backpressure: run.backpressure,
            settle_delay: run.settle_delay,
            max_samples: run.max_samples,
            pacing: pacing.clone(),
        };

        self.flags.status.connecting.set();
        let probe = ProbeThread::build(
            settings,
            self.factory.as_ref(),
            self.flags.clone(),
            queue.clone(),
            options,
            self.reporter.clone(),
        );
        self.flags.status.connecting.clear();
        let probe = probe?;

        self.armed = Some(ArmedRun {
            run: run.clone(),
            probe,
            queue,
            pipeline: CalculationPipeline::for_kind(kind),
            pacing,
        });
        self.state = OperationState::Armed;
        info!(probe_id = %run.probe_id, %kind, "Probe operation armed");
        Ok(())
    }

    /// Drop an armed run without starting it.
    pub fn disarm(&mut self) -> Result<()> {
        if self.state != OperationState::Armed {
            return Err(ProbeError::lifecycle("disarm", self.state));
        }
        self.armed = None;
        self.state = OperationState::Idle;
        Ok(())
    }

    /// Launch the probe thread, the optional clock and the consumer.
    pub fn start(&mut self) -> Result<()> {
        if self.flags.command.is_shutdown() {
            return Err(ProbeError::ShutdownInProgress("start diagnostics"));
        }
        if self.state != OperationState::Armed {
            return Err(ProbeError::lifecycle("start diagnostics", self.state));
        }
        let mut armed = self
            .armed
            .take()
            .ok_or_else(|| ProbeError::lifecycle("start diagnostics", self.state))?;
        if !armed.probe.is_ready() {
            let state = armed.probe.state();
            self.armed = Some(armed);
            return Err(ProbeError::lifecycle("start diagnostics with probe", state));
        }

        let mut clock = match (armed.run.sample_rate_hz, armed.pacing.clone()) {
            (Some(rate), Some(trigger)) => match ClockThread::new(rate, trigger, Flag::new()) {
                Ok(clock) => Some(clock),
                Err(e) => {
                    self.armed = Some(armed);
                    return Err(e);
                }
            },
            _ => None,
        };

        self.flags.command.diagnose.set();
        if let Some(clock) = clock.as_mut() {
            if let Err(e) = clock.start() {
                self.flags.command.diagnose.clear();
                self.armed = Some(armed);
                return Err(e);
            }
        }
        if let Err(e) = armed.probe.start() {
            self.flags.command.diagnose.clear();
            if let Some(clock) = clock.as_mut() {
                let _ = clock.stop();
            }
            // The worker moved into the failed spawn, so the run cannot be retried.
            self.state = OperationState::Idle;
            return Err(e);
        }

        let probe_id = armed.run.probe_id.clone();
        let consumer = Consumer {
            source: format!("operation:{probe_id}"),
            pipeline: armed.pipeline,
            queue: armed.queue,
            probe_done: armed.probe.done_flag(),
            flags: self.flags.clone(),
            display: self.display.clone(),
            poll: armed.run.queue_poll,
            counters: Arc::clone(&self.counters),
            reporter: self.reporter.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("operation-{probe_id}"))
            .spawn(move || consumer.run());

        let consumer = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                // The probe is already sampling; stop() still de-energizes it.
                error!(probe_id = %probe_id, error = %e, "Consumer thread did not start");
                None
            }
        };

        let run_id = Uuid::new_v4();
        self.active = Some(ActiveRun {
            run_id,
            run: armed.run,
            started_at: Utc::now(),
            probe: armed.probe,
            probe_exit: None,
            clock,
            consumer,
        });
        self.state = OperationState::Running;
        info!(probe_id = %probe_id, %run_id, "Diagnostics started");
        Ok(())
    }

    /// Stop sampling, wait for both threads and send the aggregate upward.
    ///
    /// If the probe thread does not finish within the join bound the operation
    /// stays in `Stopping` and a later call retries. A run that ended abnormally
    /// still delivers its records on the results channel and returns
    /// [`ProbeError::RunFailed`].
    pub fn stop(&mut self) -> Result<RunSummary> {
        if !self.is_performing() {
            return Err(ProbeError::lifecycle("stop diagnostics", self.state));
        }
        self.state = OperationState::Stopping;
        self.flags.command.diagnose.clear();

        let active = self
            .active
            .as_mut()
            .ok_or_else(|| ProbeError::lifecycle("stop diagnostics", OperationState::Stopping))?;

        if let Some(mut clock) = active.clock.take() {
            match clock.stop() {
                Ok(ticks) => debug!(ticks, "Clock stopped"),
                Err(e) => warn!(error = %e, "Clock thread did not stop cleanly"),
            }
        }

        if active.probe_exit.is_none() {
            let exit = match active.probe.join(active.run.join_timeout) {
                Ok(exit) => exit,
                Err(e @ ProbeError::JoinTimeout { .. }) => {
                    self.reporter
                        .error("operation", &format!("Probe did not stop: {e}"));
                    return Err(e);
                }
                Err(e) => ProbeExit {
                    failure: Some(e),
                    ..ProbeExit::default()
                },
            };
            active.probe_exit = Some(exit);
        }

        let consumer_exit = match active.consumer.take() {
            // The probe is done, so the consumer leaves once the queue is empty.
            Some(handle) => handle.join().unwrap_or_else(|payload| ConsumerExit {
                failure: Some(ProbeError::ThreadPanicked(format!(
                    "operation consumer: {}",
                    panic_message(payload.as_ref())
                ))),
                ..ConsumerExit::default()
            }),
            None => ConsumerExit {
                failure: Some(ProbeError::lifecycle("join consumer", "not started")),
                ..ConsumerExit::default()
            },
        };

        let Some(active) = self.active.take() else {
            return Err(ProbeError::lifecycle("stop diagnostics", self.state));
        };
        let probe_exit = active.probe_exit.unwrap_or_default();
        self.counters
            .samples_produced
            .fetch_add(probe_exit.samples_produced, Ordering::Relaxed);
        self.counters
            .samples_dropped
            .fetch_add(probe_exit.samples_dropped, Ordering::Relaxed);

        let status = match run_failure(&probe_exit, &consumer_exit) {
            Some(reason) => RunStatus::Failed(reason),
            None => RunStatus::Completed,
        };
        let summary = RunSummary {
            run_id: active.run_id,
            probe_id: active.run.probe_id.clone(),
            records: consumer_exit.records.len(),
            samples_produced: probe_exit.samples_produced,
            samples_dropped: probe_exit.samples_dropped,
            status: status.clone(),
        };
        let outcome = RunOutcome {
            run_id: active.run_id,
            probe_id: active.run.probe_id,
            started_at: active.started_at,
            stopped_at: Utc::now(),
            samples_dropped: probe_exit.samples_dropped,
            records: consumer_exit.records,
            status,
        };

        self.flags.status.transmitting.set();
        if self.results.send(outcome).is_err() {
            warn!(run_id = %summary.run_id, "Results receiver dropped; run outcome discarded");
        }
        self.flags.status.transmitting.clear();
        self.state = OperationState::Idle;

        match &summary.status {
            RunStatus::Completed => {
                self.counters.runs_completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    run_id = %summary.run_id,
                    records = summary.records,
                    dropped = summary.samples_dropped,
                    "Diagnostics stopped"
                );
                Ok(summary)
            }
            RunStatus::Failed(reason) => {
                self.counters.runs_failed.fetch_add(1, Ordering::Relaxed);
                self.reporter
                    .error("operation", &format!("Run failed: {reason}"));
                Err(ProbeError::RunFailed {
                    reason: reason.clone(),
                    records: summary.records,
                })
            }
        }
    }

    /// Stop if running, then release everything. Idempotent.
    ///
    /// Reaches `Terminated` even when the stop fails; the failure is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == OperationState::Terminated {
            return Ok(());
        }
        let stopped = if self.is_performing() {
            self.stop().map(|_| ())
        } else {
            Ok(())
        };
        self.armed = None;
        if self.active.is_none() {
            debug!("Probe operation released");
        }
        self.state = OperationState::Terminated;
        stopped
    }
}

impl Drop for ProbeOperation {
    fn drop(&mut self) {
        if self.is_performing() {
            if let Err(e) = self.shutdown() {
                error!(error = %e, "Probe operation dropped while running");
            }
        }
    }
}

impl fmt::Debug for ProbeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeOperation")
            .field("state", &self.state)
            .field("probe_id", &self.probe_id())
            .field("stats", &self.stats())
            .finish()
    }
}

fn run_failure(probe: &ProbeExit, consumer: &ConsumerExit) -> Option<String> {
    let reasons: Vec<String> = [
        probe.failure.as_ref().map(ToString::to_string),
        probe
            .cleanup_failure
            .as_ref()
            .map(|e| format!("de-energize failed: {e}")),
        consumer.failure.as_ref().map(ToString::to_string),
    ]
    .into_iter()
    .flatten()
    .collect();
    (!reasons.is_empty()).then(|| reasons.join("; "))
}

#[derive(Debug, Default)]
struct ConsumerExit {
    records: Vec<ParameterRecord>,
    discarded: u64,
    failure: Option<ProbeError>,
}

struct Consumer {
    source: String,
    pipeline: CalculationPipeline,
    queue: HandoffQueue<SampleRecord>,
    probe_done: Flag,
    flags: SystemFlags,
    display: DisplayBoard,
    poll: Duration,
    counters: Arc<OperationCounters>,
    reporter: Reporter,
}

impl Consumer {
    fn run(self) -> ConsumerExit {
        let mut exit = ConsumerExit::default();
        // The probe's done flag is raised only after its cleanup, so everything it
        // pushed is visible by then; draining to empty loses no sample.
        while !self.probe_done.is_set() || !self.queue.is_empty() {
            let Some(sample) = self.queue.pop_timeout(self.poll) else {
                continue;
            };
            if exit.failure.is_some() {
                exit.discarded += 1;
                continue;
            }

            self.flags.status.calculating.set();
            let sequence = sample.sequence;
            let computed =
                panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.run(sample)));
            self.flags.status.calculating.clear();

            match computed {
                Ok(record) => {
                    if let Err(e) = self.display.publish(&record) {
                        warn!(error = %e, "Display board rejected update");
                    }
                    self.counters
                        .records_aggregated
                        .fetch_add(1, Ordering::Relaxed);
                    exit.records.push(record);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    self.counters
                        .pipeline_failures
                        .fetch_add(1, Ordering::Relaxed);
                    self.reporter.error(
                        &self.source,
                        &format!("Calculation of sample {sequence} panicked: {message}"),
                    );
                    // Fatal for the run: stop sampling, keep draining.
                    self.flags.command.diagnose.clear();
                    exit.failure = Some(ProbeError::Calculation(format!(
                        "pipeline panicked on sample {sequence}: {message}"
                    )));
                }
            }
        }
        if exit.discarded > 0 {
            warn!(discarded = exit.discarded, "Samples discarded after pipeline failure");
        }
        debug!(records = exit.records.len(), "Consumer drained");
        exit
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
