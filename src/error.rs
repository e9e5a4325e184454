//! Custom error types for the acquisition engine.
//!
//! This module defines the primary error type, `ProbeError`, shared by every layer of
//! the crate. Using the `thiserror` crate, it gives a single place to describe what
//! can go wrong while configuring probes, driving hardware and running diagnostics.
//!
//! ## Error Hierarchy
//!
//! - **Configuration** (`Configuration`, `MissingConfigKey`, `Figment`): a bad or
//!   missing probe setting. Always surfaced at `setup()`, before any thread starts.
//! - **Lifecycle** (`Lifecycle`, `ShutdownInProgress`): a lifecycle operation was
//!   requested from a state that does not allow it (e.g. `start()` before `setup()`).
//!   These are never silently ignored.
//! - **Hardware** (`Hardware`): an I/O failure on a relay, amplifier or sensor channel.
//!   Fatal for the current run; cleanup still de-energizes the probe.
//! - **Calculation** (`Calculation`): a pipeline step panicked instead of writing NaN.
//!   Fatal for the run; samples already aggregated are kept.
//! - **Access** (`Permission`, `TokenAlreadyClaimed`, `InvalidToken`): misuse of a
//!   [`SynchronizedContainer`](crate::container::SynchronizedContainer).
//! - **Threading** (`ThreadPanicked`, `JoinTimeout`, `RunFailed`): failures observed
//!   while joining worker threads or finishing a run.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Errors produced by the acquisition engine.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Semantically invalid configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A probe setting required at setup time is absent.
    #[error("Missing configuration key '{key}' for probe '{probe_id}'")]
    MissingConfigKey { probe_id: String, key: String },

    /// Configuration file could not be parsed or extracted.
    #[error("Configuration load error: {0}")]
    Figment(#[from] figment::Error),

    /// A lifecycle operation was requested from an incompatible state.
    #[error("Cannot {operation} while {state}")]
    Lifecycle {
        operation: &'static str,
        state: String,
    },

    /// System shutdown has been requested; no new work may begin.
    #[error("Shutdown in progress, refusing to {0}")]
    ShutdownInProgress(&'static str),

    /// Relay, amplifier or channel I/O failure.
    #[error("Hardware error on {device}: {message}")]
    Hardware { device: String, message: String },

    /// A pipeline step panicked on a sample.
    #[error("Calculation error: {0}")]
    Calculation(String),

    /// Container gate refused the access.
    #[error("Permission denied: container is not {0}")]
    Permission(&'static str),

    /// The container bypass token has already been handed out.
    #[error("Bypass token has already been claimed")]
    TokenAlreadyClaimed,

    /// A bypass token that does not belong to this container was presented.
    #[error("Invalid bypass token")]
    InvalidToken,

    /// A worker thread panicked instead of returning.
    #[error("Thread '{0}' panicked")]
    ThreadPanicked(String),

    /// A worker thread did not finish within its bound.
    #[error("Thread '{name}' did not finish within {timeout_ms} ms")]
    JoinTimeout { name: String, timeout_ms: u64 },

    /// The run ended abnormally; `records` were still aggregated before the failure.
    #[error("Run failed after {records} records: {reason}")]
    RunFailed { reason: String, records: usize },

    /// I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation of container values.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProbeError {
    /// Shorthand for a hardware failure on a named device.
    pub fn hardware(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hardware {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a lifecycle misuse.
    pub fn lifecycle(operation: &'static str, state: impl ToString) -> Self {
        Self::Lifecycle {
            operation,
            state: state.to_string(),
        }
    }

    /// Check if this is a lifecycle misuse (including shutdown refusals).
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle { .. } | Self::ShutdownInProgress(_))
    }

    /// Check if this is a configuration problem.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::MissingConfigKey { .. } | Self::Figment(_)
        )
    }

    /// Check if this is a hardware failure.
    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::Hardware { .. })
    }

    /// Whether the caller can retry after fixing its request.
    ///
    /// Hardware faults, panics and failed runs need operator attention; everything
    /// else is a rejected request that left the system unchanged.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Hardware { .. }
                | Self::Calculation(_)
                | Self::ThreadPanicked(_)
                | Self::JoinTimeout { .. }
                | Self::RunFailed { .. }
                | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProbeError::MissingConfigKey {
            probe_id: "slp-1".into(),
            key: "shunt_resistance".into(),
        };
        assert!(err.to_string().contains("slp-1"));
        assert!(err.to_string().contains("shunt_resistance"));

        let err = ProbeError::lifecycle("start", "idle");
        assert_eq!(err.to_string(), "Cannot start while idle");
    }

    #[test]
    fn test_classification() {
        assert!(ProbeError::lifecycle("stop", "idle").is_lifecycle());
        assert!(ProbeError::ShutdownInProgress("setup").is_lifecycle());
        assert!(ProbeError::Configuration("bad".into()).is_configuration());
        assert!(ProbeError::hardware("relay-1", "stuck").is_hardware());
        assert!(!ProbeError::hardware("relay-1", "stuck").is_recoverable());
        assert!(ProbeError::TokenAlreadyClaimed.is_recoverable());
        assert!(!ProbeError::Calculation("step panicked".into()).is_recoverable());
    }
}
