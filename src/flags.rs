//! Process-wide signal flags shared between the clock, probe and operation threads.
//!
//! A [`Flag`] is a cloneable binary event: any clone can set, clear or wait on
//! it, and waiters are woken as soon as the state changes. Two groups of flags are
//! built on top of it:
//!
//! - [`StatusFlags`]: indicators owned by one subsystem each and read by everyone
//!   else (`operating` belongs to the probe thread, `calculating` to the operation
//!   thread, and so on).
//! - [`CommandFlags`]: triggers raised by a controller. `shutdown` is monotonic: it
//!   can be requested but never cleared for the lifetime of the flags.
//!
//! ```
//! use plasma_daq::flags::SystemFlags;
//! use std::time::Duration;
//!
//! let flags = SystemFlags::new();
//! flags.command.diagnose.set();
//! assert!(flags.command.diagnose.wait(Duration::from_millis(10)));
//!
//! flags.command.request_shutdown();
//! assert!(flags.command.is_shutdown());
//! ```

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct FlagInner {
    state: Mutex<bool>,
    changed: Condvar,
}

/// Thread-shared binary event.
///
/// Cloning a `Flag` yields another handle on the same state.
#[derive(Clone)]
pub struct Flag {
    inner: Arc<FlagInner>,
}

impl Flag {
    /// Create a cleared flag.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FlagInner {
                state: Mutex::new(false),
                changed: Condvar::new(),
            }),
        }
    }

    /// Set the flag and wake every waiter.
    pub fn set(&self) {
        let mut state = self.inner.state.lock();
        *state = true;
        self.inner.changed.notify_all();
    }

    /// Clear the flag and wake every waiter.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        *state = false;
        self.inner.changed.notify_all();
    }

    /// Current state.
    pub fn is_set(&self) -> bool {
        *self.inner.state.lock()
    }

    /// Clear the flag, returning whether it was set.
    ///
    /// Consumers of a trigger use this so that one tick is consumed exactly once.
    pub fn take(&self) -> bool {
        let mut state = self.inner.state.lock();
        let was_set = *state;
        *state = false;
        if was_set {
            self.inner.changed.notify_all();
        }
        was_set
    }

    /// Block until the flag is set or `timeout` elapses. Returns the final state.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wait_for(true, timeout)
    }

    /// Block until the flag is cleared or `timeout` elapses. Returns `true` if cleared.
    pub fn wait_cleared(&self, timeout: Duration) -> bool {
        !self.wait_for(false, timeout)
    }

    fn wait_for(&self, wanted: bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while *state != wanted {
            if self
                .inner
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        *state
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Flag").field(&self.is_set()).finish()
    }
}

/// Indicators describing what each subsystem is currently doing.
#[derive(Clone, Debug, Default)]
pub struct StatusFlags {
    /// Probe hardware is (or may be) energized. Set strictly before relays are
    /// enabled and cleared strictly after they are confirmed disabled.
    pub operating: Flag,
    /// The consumer loop is turning samples into parameter records.
    pub calculating: Flag,
    /// A hardware connection is being established.
    pub connecting: Flag,
    /// Results are being transmitted upward.
    pub transmitting: Flag,
    /// Results are being formatted for persistence.
    pub formatting: Flag,
    /// Configuration is being loaded.
    pub loading_config: Flag,
    /// Configuration is being written.
    pub writing_config: Flag,
}

impl StatusFlags {
    /// Create all status flags cleared.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Triggers raised by the controlling layer.
#[derive(Clone, Debug, Default)]
pub struct CommandFlags {
    shutdown: Flag,
    /// Diagnostics should run; the probe loop samples while this is set.
    pub diagnose: Flag,
    /// A fresh display snapshot is available. Cleared by the reader.
    pub refresh: Flag,
    /// Emergency stop: the probe loop exits at the next iteration boundary.
    pub emergency: Flag,
}

impl CommandFlags {
    /// Create all command flags cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request process shutdown. Irreversible.
    pub fn request_shutdown(&self) {
        self.shutdown.set();
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_set()
    }

    /// Block until shutdown is requested or `timeout` elapses.
    pub fn wait_shutdown(&self, timeout: Duration) -> bool {
        self.shutdown.wait(timeout)
    }
}

/// Every flag shared across the engine's threads.
#[derive(Clone, Debug, Default)]
pub struct SystemFlags {
    /// Subsystem status indicators.
    pub status: StatusFlags,
    /// Controller triggers.
    pub command: CommandFlags,
}

impl SystemFlags {
    /// Create a fresh, fully cleared flag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a sampling loop should keep going.
    pub fn should_sample(&self) -> bool {
        self.command.diagnose.is_set()
            && !self.command.is_shutdown()
            && !self.command.emergency.is_set()
    }
}
