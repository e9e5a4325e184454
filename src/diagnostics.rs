//! Diagnostics layer: the surface an application drives.
//!
//! [`DiagnosticsLayer`] owns the shared [`SystemFlags`], the [`DisplayBoard`] and
//! the receiving end of the results channel, and forwards lifecycle calls to a
//! [`ProbeOperation`] built from an injected [`HardwareFactory`] and
//! [`ConfigManager`].
//!
//! The display board is exposed read-only. A UI poller calls
//! [`DisplayBoard::take_refreshed`], which clears `refresh` before reading so an
//! update that lands meanwhile is never lost.

use crate::config::{ConfigManager, RunConfig};
use crate::container::{BypassToken, SynchronizedContainer};
use crate::error::{ProbeError, Result};
use crate::flags::{Flag, SystemFlags};
use crate::hardware::HardwareFactory;
use crate::lifecycle::{Configurable, Lifecycle};
use crate::operation::{OperationStats, ProbeOperation, RunOutcome, RunSummary};
use crate::record::ParameterRecord;
use crate::report::Reporter;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{info, warn};

/// Key carrying the probe identifier on the display board.
pub const DISPLAY_PROBE_KEY: &str = "Probe";
/// Key carrying the sequence number of the displayed record.
pub const DISPLAY_SEQUENCE_KEY: &str = "Sequence";

const RUN_POLL: Duration = Duration::from_millis(50);

/// Real-time display: a read-only container plus the `refresh` flag.
///
/// Only the holder of the container's bypass token (this board) writes, and it
/// always replaces the whole mapping.
#[derive(Clone)]
pub struct DisplayBoard {
    container: Arc<SynchronizedContainer>,
    token: Arc<BypassToken>,
    refresh: Flag,
}

impl DisplayBoard {
    /// Create an empty board signalling on `refresh`.
    pub fn new(refresh: Flag) -> Result<Self> {
        let container = Arc::new(SynchronizedContainer::new());
        let token = Arc::new(container.claim_token()?);
        container.set_writeable(false);
        Ok(Self {
            container,
            token,
            refresh,
        })
    }

    /// Overwrite the board with `record`'s display subset and set `refresh`.
    ///
    /// NaN values are shown as `null`.
    pub fn publish(&self, record: &ParameterRecord) -> Result<()> {
        let mut map: HashMap<String, Value> = record
            .display
            .values
            .iter()
            .map(|entry| (entry.name.clone(), json!(entry.value)))
            .collect();
        map.insert(DISPLAY_PROBE_KEY.to_string(), json!(record.probe_id));
        map.insert(DISPLAY_SEQUENCE_KEY.to_string(), json!(record.sequence));
        self.container.replace_all_with_token(&self.token, map)?;
        self.refresh.set();
        Ok(())
    }

    /// Clear `refresh` and return the board if it had been set.
    pub fn take_refreshed(&self) -> Result<Option<HashMap<String, Value>>> {
        if self.refresh.take() {
            self.container.snapshot().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Current contents, leaving `refresh` alone.
    pub fn snapshot(&self) -> Result<HashMap<String, Value>> {
        self.container.snapshot()
    }

    /// Displayed value of `name`; `None` if absent or not a number.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.container.get(name).ok().flatten()?.as_f64()
    }

    /// The underlying container, for pollers that read it directly.
    pub fn container(&self) -> &Arc<SynchronizedContainer> {
        &self.container
    }

    /// The `refresh` flag.
    pub fn refresh_flag(&self) -> &Flag {
        &self.refresh
    }
}

impl fmt::Debug for DisplayBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayBoard")
            .field("entries", &self.container.len())
            .field("refresh", &self.refresh.is_set())
            .finish()
    }
}

/// Upper layer owning the flags, display and results of the diagnostics engine.
pub struct DiagnosticsLayer {
    flags: SystemFlags,
    config: Arc<dyn ConfigManager>,
    display: DisplayBoard,
    operation: ProbeOperation,
    results: UnboundedReceiver<RunOutcome>,
}

impl DiagnosticsLayer {
    /// Build the layer and its idle operation.
    pub fn new(
        factory: Arc<dyn HardwareFactory>,
        config: Arc<dyn ConfigManager>,
        reporter: Reporter,
    ) -> Result<Self> {
        let flags = SystemFlags::new();
        let display = DisplayBoard::new(flags.command.refresh.clone())?;
        let (tx, results) = unbounded_channel();
        let operation =
            ProbeOperation::new(flags.clone(), factory, display.clone(), tx, reporter);
        Ok(Self {
            flags,
            config,
            display,
            operation,
            results,
        })
    }

    /// Shared flags.
    pub fn flags(&self) -> &SystemFlags {
        &self.flags
    }

    /// Real-time display.
    pub fn display(&self) -> &DisplayBoard {
        &self.display
    }

    /// The operation being driven.
    pub fn operation(&self) -> &ProbeOperation {
        &self.operation
    }

    /// Operation counters.
    pub fn stats(&self) -> OperationStats {
        self.operation.stats()
    }

    /// Next delivered run outcome, if any.
    pub fn try_next_result(&mut self) -> Option<RunOutcome> {
        self.results.try_recv().ok()
    }

    /// Set up `run`, run it for `duration` (or until the probe finishes or
    /// shutdown is requested), stop and return its outcome.
    ///
    /// A failed run still returns its outcome, with a failed status. An error is
    /// returned only when no outcome was produced.
    pub fn run_for(&mut self, run: &RunConfig, duration: Duration) -> Result<RunOutcome> {
        self.setup(run)?;
        if let Err(e) = self.start() {
            let _ = self.operation.disarm();
            return Err(e);
        }

        let deadline = Instant::now() + duration;
        while !self.operation.is_probe_finished() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.flags.command.wait_shutdown(RUN_POLL.min(deadline - now)) {
                info!("Shutdown requested, ending run early");
                break;
            }
        }

        let stopped = self.stop();
        match self.try_next_result() {
            Some(outcome) => Ok(outcome),
            None => Err(match stopped {
                Err(e) => e,
                Ok(summary) => ProbeError::RunFailed {
                    reason: "no outcome delivered".to_string(),
                    records: summary.records,
                },
            }),
        }
    }
}

impl Configurable for DiagnosticsLayer {
    type Config = RunConfig;

    fn setup(&mut self, config: &RunConfig) -> Result<()> {
        self.operation.setup(self.config.as_ref(), config)
    }
}

impl Lifecycle for DiagnosticsLayer {
    fn start(&mut self) -> Result<()> {
        self.operation.start()
    }

    fn stop(&mut self) -> Result<RunSummary> {
        self.operation.stop()
    }

    /// Request the global shutdown, then shut the operation down.
    fn shutdown(&mut self) -> Result<()> {
        self.flags.command.request_shutdown();
        let result = self.operation.shutdown();
        if let Err(e) = &result {
            warn!(error = %e, "Diagnostics shutdown incomplete");
        }
        result
    }

    fn state_name(&self) -> &'static str {
        self.operation.state().as_str()
    }
}

impl fmt::Debug for DiagnosticsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticsLayer")
            .field("operation", &self.operation)
            .field("display", &self.display)
            .finish()
    }
}
