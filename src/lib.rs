//! # Plasma probe diagnostics engine
//!
//! Real-time acquisition and analysis for electrostatic plasma probes: single,
//! double and triple Langmuir probes and retarding-field energy analyzers.
//!
//! ## Crate Structure
//!
//! - **`flags`**: [`Flag`] events and the shared [`SystemFlags`] (status flags with a
//!   single writer each, command flags including the monotonic `shutdown`).
//! - **`container`**: [`SynchronizedContainer`], the gated key-value store with a
//!   single-use bypass token.
//! - **`config`**: TOML/env configuration via `figment`, the [`ConfigManager`] seam
//!   and per-run [`RunConfig`].
//! - **`hardware`**: relay, amplifier and channel traits behind a
//!   [`HardwareFactory`](hardware::HardwareFactory), plus a simulated bench in
//!   `hardware::mock`.
//! - **`probe`**: the producer thread ([`ProbeThread`]) and its bounded hand-off
//!   queue. Owns the energize/de-energize ordering around the `operating` flag.
//! - **`clock`**: [`ClockThread`], optional sample pacing.
//! - **`pipeline`**: per-kind [`CalculationPipeline`]s that turn raw samples into
//!   parameter records, propagating NaN instead of failing.
//! - **`operation`**: [`ProbeOperation`], the producer/consumer orchestrator.
//! - **`diagnostics`**: [`DiagnosticsLayer`] and the real-time [`DisplayBoard`].
//! - **`lifecycle`**: the [`Configurable`] and [`Lifecycle`] capability traits.
//! - **`report`**, **`telemetry`**: operator messages and `tracing` setup.
//! - **`error`**: the crate-wide [`ProbeError`].

pub mod clock;
pub mod config;
pub mod container;
pub mod diagnostics;
pub mod error;
pub mod flags;
pub mod hardware;
pub mod lifecycle;
pub mod operation;
pub mod pipeline;
pub mod probe;
pub mod record;
pub mod report;
pub mod telemetry;

pub use clock::ClockThread;
pub use config::{ConfigManager, ConfigStore, DaqConfig, RunConfig};
pub use container::{BypassToken, SynchronizedContainer};
pub use diagnostics::{DiagnosticsLayer, DisplayBoard};
pub use error::{ProbeError, Result};
pub use flags::{Flag, SystemFlags};
pub use lifecycle::{Configurable, Lifecycle};
pub use operation::{OperationStats, ProbeOperation, RunOutcome, RunStatus, RunSummary};
pub use pipeline::CalculationPipeline;
pub use probe::queue::{BackpressurePolicy, HandoffQueue};
pub use probe::{ProbeKind, ProbeThread};
pub use record::{DisplayRecord, ParameterRecord, SampleRecord};
pub use report::Reporter;
