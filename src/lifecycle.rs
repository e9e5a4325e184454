//! Capability traits shared by the layers that own threads.
//!
//! A layer that can be configured implements [`Configurable`]; a layer that runs
//! implements [`Lifecycle`]. Each concrete layer implements only what it needs
//! instead of inheriting a chain of abstract bases.

use crate::error::Result;
use crate::operation::RunSummary;

/// A layer that accepts configuration before it runs.
pub trait Configurable {
    /// Configuration accepted by [`setup`](Configurable::setup).
    type Config;

    /// Validate `config` and prepare to run.
    ///
    /// A rejected configuration leaves the layer in the state it was in.
    fn setup(&mut self, config: &Self::Config) -> Result<()>;
}

/// Start/stop/shutdown control over a layer.
///
/// Every method rejects a call from a state that does not allow it with a
/// lifecycle error instead of ignoring it.
pub trait Lifecycle {
    /// Begin running.
    fn start(&mut self) -> Result<()>;

    /// Stop running and report the finished run.
    fn stop(&mut self) -> Result<RunSummary>;

    /// Stop if running and release everything. Idempotent.
    fn shutdown(&mut self) -> Result<()>;

    /// Current state for logs and status displays.
    fn state_name(&self) -> &'static str;
}
