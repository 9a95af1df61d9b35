use std::{
    ops::{ControlFlow, Range},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error};

use crate::StrideError;

/// A monotonic millisecond counter. The origin is arbitrary, only differences
/// between two readings are meaningful.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

pub struct SystemTimeSource {
    origin: Instant,
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A time source that only moves when told to. Clones share the same counter, so a
/// test can keep one handle and give the other to a controller.
#[derive(Clone, Default)]
pub struct ManualTimeSource {
    now: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Result of bringing the clock up to date.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClockReading {
    pub total_millis: u64,
    /// Whole seconds reached for the first time by this reading. Usually empty or a
    /// single second, longer when a tick was delayed.
    pub crossed_seconds: Range<u64>,
}

impl ClockReading {
    pub fn boundary_count(&self) -> u64 {
        self.crossed_seconds.end - self.crossed_seconds.start
    }
}

/// Elapsed time accumulator.
///
/// While running, the total is `accumulated + (now - resumed_at)`. Pausing folds the
/// current lap into `accumulated`, so a later resume continues from the same total.
/// Second boundaries are tracked separately from the millisecond total and each one
/// is reported exactly once.
#[derive(Clone, Debug, Default)]
pub struct Clock {
    accumulated_ms: u64,
    resumed_at_ms: Option<u64>,
    total_ms: u64,
    seconds_emitted: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.resumed_at_ms.is_some()
    }

    pub fn total_millis(&self) -> u64 {
        self.total_ms
    }

    /// Starts a new lap at `now_ms`. Returns false if the clock was already running.
    pub fn resume(&mut self, now_ms: u64) -> bool {
        if self.is_running() {
            return false;
        }
        self.resumed_at_ms = Some(now_ms);
        true
    }

    pub fn advance(&mut self, now_ms: u64) -> ClockReading {
        let Some(resumed_at_ms) = self.resumed_at_ms else {
            return self.reading_without_crossing();
        };

        let lap_ms = now_ms.saturating_sub(resumed_at_ms);
        // a time source stepping backwards must not move the total backwards
        self.total_ms = self.total_ms.max(self.accumulated_ms + lap_ms);

        let whole_seconds = self.total_ms / 1000;
        let crossed_seconds = (self.seconds_emitted + 1)..(whole_seconds.max(self.seconds_emitted) + 1);
        self.seconds_emitted = self.seconds_emitted.max(whole_seconds);

        ClockReading {
            total_millis: self.total_ms,
            crossed_seconds,
        }
    }

    /// Brings the clock up to date at `now_ms` and freezes it there.
    pub fn pause(&mut self, now_ms: u64) -> ClockReading {
        let reading = self.advance(now_ms);
        self.accumulated_ms = self.total_ms;
        self.resumed_at_ms = None;
        reading
    }

    fn reading_without_crossing(&self) -> ClockReading {
        let next = self.seconds_emitted + 1;
        ClockReading {
            total_millis: self.total_ms,
            crossed_seconds: next..next,
        }
    }
}

/// Cooperative periodic ticker running on its own thread.
///
/// The loop sleeps for one interval, then checks its enabled flag before calling the
/// tick callback. Clearing the flag stops the loop within one interval. The flag is
/// handed to the callback too, so it can re-check it under whatever lock guards the
/// state being ticked.
pub struct TimerLoop {
    enabled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimerLoop {
    pub fn spawn<F>(interval: Duration, mut on_tick: F) -> Result<Self, StrideError>
    where
        F: FnMut(&AtomicBool) -> ControlFlow<()> + Send + 'static,
    {
        let enabled = Arc::new(AtomicBool::new(true));
        let loop_enabled = Arc::clone(&enabled);
        let handle = thread::Builder::new()
            .name("stride-timer".to_string())
            .spawn(move || {
                let mut ticks: u64 = 0;
                loop {
                    thread::sleep(interval);
                    if !loop_enabled.load(Ordering::Acquire) {
                        break;
                    }
                    ticks += 1;
                    if on_tick(&loop_enabled).is_break() {
                        break;
                    }
                }
                debug!("Timer loop exited after {} ticks", ticks);
            })
            .map_err(|e| StrideError::ThreadSpawnError {
                name: "timer".to_string(),
                source: e,
            })?;

        Ok(Self {
            enabled,
            handle: Some(handle),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Asks the loop to exit at its next tick without waiting for it.
    pub fn signal_stop(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Stops the loop and waits for the thread to finish.
    pub fn join(mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Timer loop thread panicked");
            }
        }
    }
}

impl Drop for TimerLoop {
    fn drop(&mut self) {
        self.signal_stop();
    }
}
