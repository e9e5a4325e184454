//! Periodic trigger thread.
//!
//! A [`ClockThread`] sets a trigger [`Flag`] at a fixed rate until its kill flag is
//! raised. Ticks are scheduled against absolute deadlines so the period does not
//! drift with wake-up latency, and the wait between ticks is the kill flag's own
//! timed wait, so a kill takes effect immediately rather than at the next tick.

use crate::error::{ProbeError, Result};
use crate::flags::Flag;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Tick period of a clock running at `rate_hz`.
///
/// Rejects rates that are not positive or whose period does not fit a [`Duration`].
pub fn period_for(rate_hz: f64) -> Result<Duration> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return Err(ProbeError::Configuration(format!(
            "Clock rate must be positive, got {rate_hz}"
        )));
    }
    Duration::try_from_secs_f64(1.0 / rate_hz).map_err(|_| {
        ProbeError::Configuration(format!("Clock rate {rate_hz} Hz gives no usable period"))
    })
}

/// Fixed-rate trigger source.
#[derive(Debug)]
pub struct ClockThread {
    period: Duration,
    trigger: Flag,
    kill: Flag,
    handle: Option<JoinHandle<u64>>,
}

impl ClockThread {
    /// Create a clock ticking at `rate_hz` onto `trigger` until `kill` is set.
    pub fn new(rate_hz: f64, trigger: Flag, kill: Flag) -> Result<Self> {
        Ok(Self {
            period: period_for(rate_hz)?,
            trigger,
            kill,
            handle: None,
        })
    }

    /// Tick period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the clock thread is running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the clock thread. The trigger is cleared first.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(ProbeError::lifecycle("start clock", "running"));
        }
        let period = self.period();
        let trigger = self.trigger.clone();
        let kill = self.kill.clone();
        trigger.clear();

        let handle = thread::Builder::new()
            .name("clock".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut ticks = 0u64;
                loop {
                    let deadline = started + period.mul_f64((ticks + 1) as f64);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if kill.wait(remaining) {
                        break;
                    }
                    trigger.set();
                    ticks += 1;
                    trace!(ticks, "Clock tick");
                }
                debug!(ticks, "Clock stopped");
                ticks
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Raise the kill flag and join, returning the number of ticks emitted.
    pub fn stop(&mut self) -> Result<u64> {
        self.kill.set();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ProbeError::ThreadPanicked("clock".to_string())),
            None => Ok(0),
        }
    }
}

impl Drop for ClockThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_at_rate_until_killed() {
        let trigger = Flag::new();
        let kill = Flag::new();
        let mut clock = ClockThread::new(10.0, trigger.clone(), kill.clone()).unwrap();
        clock.start().unwrap();
        assert!(clock.is_running());

        thread::sleep(Duration::from_millis(500));
        kill.set();
        let ticks = clock.stop().unwrap();
        assert!((4..=6).contains(&ticks), "got {ticks} ticks");
        assert!(trigger.is_set());
    }

    #[test]
    fn test_kill_interrupts_wait() {
        let kill = Flag::new();
        let mut clock = ClockThread::new(0.1, Flag::new(), kill).unwrap();
        clock.start().unwrap();
        let start = Instant::now();
        assert_eq!(clock.stop().unwrap(), 0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_start_clears_stale_trigger() {
        let trigger = Flag::new();
        trigger.set();
        let mut clock = ClockThread::new(1.0, trigger.clone(), Flag::new()).unwrap();
        clock.start().unwrap();
        assert!(!trigger.is_set());
        clock.stop().unwrap();
    }

    #[test]
    fn test_invalid_rate() {
        assert!(ClockThread::new(0.0, Flag::new(), Flag::new()).is_err());
        assert!(ClockThread::new(f64::NAN, Flag::new(), Flag::new()).is_err());
        let err = ClockThread::new(1e-20, Flag::new(), Flag::new()).unwrap_err();
        assert!(err.is_configuration());
        let clock = ClockThread::new(4.0, Flag::new(), Flag::new()).unwrap();
        assert_eq!(clock.period(), Duration::from_millis(250));
    }

    #[test]
    fn test_consumer_takes_each_tick() {
        let trigger = Flag::new();
        let mut clock = ClockThread::new(50.0, trigger.clone(), Flag::new()).unwrap();
        clock.start().unwrap();
        let mut seen = 0;
        let deadline = Instant::now() + Duration::from_millis(300);
        while Instant::now() < deadline {
            if trigger.wait(Duration::from_millis(50)) && trigger.take() {
                seen += 1;
            }
        }
        let ticks = clock.stop().unwrap();
        assert!(seen > 0);
        assert!(seen <= ticks);
    }
}
