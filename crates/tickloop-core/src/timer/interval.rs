//! The interval timer primitive.
//!
//! A [`Timer`] tracks elapsed time against an interval and a repeat budget.
//! It has no thread of its own: an owner advances it by calling
//! [`Timer::update`] with monotonic timestamps. The registry driver does this
//! continuously; the unit tests do it by hand.
//!
//! Missed intervals are batched: one `update` that crosses several interval
//! boundaries fires the run callback once, carrying the count.

use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Opaque user payload, shared with relayed callbacks across threads.
/// Run callbacks may mutate it to carry state between ticks.
pub type SharedParam = Arc<Mutex<Value>>;

/// Callback slot invoked on each tick with the number of elapsed intervals.
pub type RunCallback = Box<dyn FnMut(u32, &SharedParam) + Send>;

/// Callback slot invoked once when the timer terminates.
pub type OverCallback = Box<dyn FnMut(&SharedParam) + Send>;

/// What a single [`Timer::update`] pass observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Not running; nothing to do.
    Inactive,
    /// Running but no interval boundary was crossed (or paused).
    Pending,
    /// The run callback fired, batching this many elapsed intervals.
    Ticked(u32),
    /// The clock reported a timestamp before the interval window; the window
    /// was restarted without firing.
    Regressed,
    /// The repeat budget is spent; the timer stopped itself and should be
    /// removed by its owner.
    Exhausted,
}

pub struct Timer {
    id: String,
    interval_ms: u64,
    /// Target tick count; 0 repeats forever.
    total_count: u32,
    current_count: u32,
    /// Timestamp of the last tick boundary.
    start_ms: u64,
    running: bool,
    paused: bool,
    run_callback: Option<RunCallback>,
    over_callback: Option<OverCallback>,
    param: SharedParam,
}

impl Timer {
    /// A timer is created stopped; call [`Timer::start`] to arm it.
    ///
    /// The registry validates intervals at registration; a zero interval
    /// here simply never ticks.
    pub fn new(
        id: impl Into<String>,
        interval_ms: u64,
        total_count: u32,
        run_callback: Option<RunCallback>,
        over_callback: Option<OverCallback>,
        param: Value,
    ) -> Self {
        Self {
            id: id.into(),
            interval_ms,
            total_count,
            current_count: 0,
            start_ms: 0,
            running: false,
            paused: false,
            run_callback,
            over_callback,
            param: Arc::new(Mutex::new(param)),
        }
    }

    /// Begin ticking at `now_ms`. No-op if already running.
    ///
    /// `fire_immediately` fires a priming tick with `runs = 1`. The priming
    /// tick does not consume the repeat budget.
    pub fn start(&mut self, now_ms: u64, fire_immediately: bool) {
        if self.running {
            return;
        }
        self.running = true;
        self.paused = false;
        self.current_count = 0;
        self.start_ms = now_ms;
        if fire_immediately {
            if let Some(run) = self.run_callback.as_mut() {
                run(1, &self.param);
            }
        }
    }

    /// Advance against `now_ms`, firing callbacks for crossed boundaries.
    ///
    /// A tick that spends the last of the budget stops the timer and fires
    /// the over callback in the same call. While paused, or after a backward
    /// clock jump, the interval window restarts at `now_ms` without firing.
    pub fn update(&mut self, now_ms: u64) -> UpdateOutcome {
        if !self.running {
            return UpdateOutcome::Inactive;
        }
        if self.paused {
            self.start_ms = now_ms;
            return UpdateOutcome::Pending;
        }
        if now_ms < self.start_ms {
            self.start_ms = now_ms;
            return UpdateOutcome::Regressed;
        }
        let mut runs = 0u32;
        if self.total_count == 0 || self.current_count < self.total_count {
            let elapsed = now_ms - self.start_ms;
            if self.interval_ms > 0 && elapsed >= self.interval_ms {
                runs = u32::try_from(elapsed / self.interval_ms).unwrap_or(u32::MAX);
                self.current_count = self.current_count.saturating_add(runs);
                self.start_ms = now_ms;
                if let Some(run) = self.run_callback.as_mut() {
                    run(runs, &self.param);
                }
            }
        }
        if self.total_count > 0 && self.current_count >= self.total_count {
            self.stop(true);
            return UpdateOutcome::Exhausted;
        }
        if runs > 0 {
            UpdateOutcome::Ticked(runs)
        } else {
            UpdateOutcome::Pending
        }
    }

    /// Stop ticking. No-op if not running, so the over callback fires at
    /// most once per lifetime.
    ///
    /// Returns whether the timer was running.
    pub fn stop(&mut self, fire_over: bool) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        self.paused = true;
        if fire_over {
            if let Some(over) = self.over_callback.as_mut() {
                over(&self.param);
            }
        }
        true
    }

    /// Suspend ticking without resetting counters.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume ticking. Time spent paused is not caught up: every paused
    /// `update` restarted the interval window.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Takes effect at the next evaluation.
    pub fn set_interval_ms(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    pub fn total_count(&self) -> u32 {
        self.total_count
    }

    /// Lowering the target below `current_count` stops the timer at its
    /// next evaluation.
    pub fn set_total_count(&mut self, total_count: u32) {
        self.total_count = total_count;
    }

    pub fn current_count(&self) -> u32 {
        self.current_count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Handle to the opaque user payload shared with callbacks.
    pub fn param(&self) -> SharedParam {
        Arc::clone(&self.param)
    }

    /// Replace the payload contents in place; callback handles keep seeing it.
    pub fn set_param(&mut self, value: Value) {
        *self.param.lock().unwrap() = value;
    }

    pub fn set_run_callback(&mut self, callback: Option<RunCallback>) {
        self.run_callback = callback;
    }

    pub fn set_over_callback(&mut self, callback: Option<OverCallback>) {
        self.over_callback = callback;
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("interval_ms", &self.interval_ms)
            .field("total_count", &self.total_count)
            .field("current_count", &self.current_count)
            .field("running", &self.running)
            .field("paused", &self.paused)
            .finish()
    }
}
