//! Operator-facing message sinks.
//!
//! Worker threads describe what they are doing through a [`Reporter`], chosen once
//! when a layer is constructed. The default routes into `tracing`; a UI can pass a
//! [`Reporter::Captured`] buffer and poll it, and tests can silence output entirely.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::Level;

const MAX_LOG_ENTRIES: usize = 1000;

/// Represents a single captured message.
#[derive(Clone, Debug)]
pub struct LogEntry {
    /// When the message was reported
    pub timestamp: DateTime<Local>,
    /// Severity
    pub level: Level,
    /// Reporting component (e.g. `probe:slp-1`)
    pub source: String,
    /// Message text
    pub message: String,
}

/// A thread-safe, fixed-capacity message buffer.
#[derive(Clone, Debug)]
pub struct LogBuffer(Arc<Mutex<VecDeque<LogEntry>>>);

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LOG_ENTRIES))))
    }

    fn push(&self, entry: LogEntry) {
        let mut buffer = self.0.lock();
        if buffer.len() >= MAX_LOG_ENTRIES {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    /// Copy of the buffered entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.0.lock().iter().cloned().collect()
    }

    /// Whether any buffered message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.0.lock().iter().any(|e| e.message.contains(needle))
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all buffered entries.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Where operator messages go.
#[derive(Clone, Debug, Default)]
pub enum Reporter {
    /// Emit through `tracing` at the message's level
    #[default]
    Tracing,
    /// Print to stdout
    Console,
    /// Keep in a bounded buffer
    Captured(LogBuffer),
    /// Discard
    Silent,
}

impl Reporter {
    /// Report one message from `source`.
    pub fn report(&self, level: Level, source: &str, message: &str) {
        match self {
            Reporter::Tracing => match level {
                Level::ERROR => tracing::error!(source, "{message}"),
                Level::WARN => tracing::warn!(source, "{message}"),
                Level::INFO => tracing::info!(source, "{message}"),
                Level::DEBUG => tracing::debug!(source, "{message}"),
                Level::TRACE => tracing::trace!(source, "{message}"),
            },
            Reporter::Console => {
                println!("[{}] {level:>5} {source}: {message}", Local::now().format("%H:%M:%S%.3f"));
            }
            Reporter::Captured(buffer) => buffer.push(LogEntry {
                timestamp: Local::now(),
                level,
                source: source.to_string(),
                message: message.to_string(),
            }),
            Reporter::Silent => {}
        }
    }

    /// Report at info level.
    pub fn info(&self, source: &str, message: &str) {
        self.report(Level::INFO, source, message);
    }

    /// Report at warn level.
    pub fn warn(&self, source: &str, message: &str) {
        self.report(Level::WARN, source, message);
    }

    /// Report at error level.
    pub fn error(&self, source: &str, message: &str) {
        self.report(Level::ERROR, source, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_reporter() {
        let buffer = LogBuffer::new();
        let reporter = Reporter::Captured(buffer.clone());
        reporter.info("probe:slp-1", "relays enabled");
        reporter.warn("operation:slp-1", "sample dropped");

        let entries = buffer.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, "probe:slp-1");
        assert_eq!(entries[1].level, Level::WARN);
        assert!(buffer.contains("dropped"));
    }

    #[test]
    fn test_buffer_is_bounded() {
        let buffer = LogBuffer::new();
        let reporter = Reporter::Captured(buffer.clone());
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            reporter.info("test", &format!("message {i}"));
        }
        assert_eq!(buffer.len(), MAX_LOG_ENTRIES);
        assert_eq!(buffer.entries()[0].message, "message 10");
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_silent_reporter_discards() {
        Reporter::Silent.error("test", "nothing happens");
    }
}
