//! Timer multiplexing over a single driver thread.
//!
//! A [`TimerRegistry`] owns a map of id -> [`Timer`] and a background driver
//! thread that advances every live timer against a monotonic clock, once per
//! pass. User callbacks are baked into each timer as relays that forward the
//! delivery onto the injected [`Dispatcher`], so user code never runs on the
//! driver thread.
//!
//! Registration, cancellation, and the driver's iteration may race from
//! arbitrary threads. A timer that spends its budget removes itself from the
//! map (via its completion relay) before its completion callback is posted;
//! the driver pass performs a second, defensive removal.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::{Clock, MonotonicClock};
use crate::config::DriverConfig;
use crate::error::{Result, ValidationError};
use crate::events::{CallbackStage, Event, EventSink, NullSink};
use crate::registry::dispatch::{Dispatcher, Task};
use crate::timer::{OverCallback, RunCallback, Timer, UpdateOutcome};

/// Tick callback: `(timer_id, runs, param)`, delivered on the dispatch
/// target with the number of intervals batched into this tick.
pub type TickHandler = Box<dyn FnMut(&str, u32, &mut Value) + Send>;

/// Completion callback: `(timer_id, param)`, delivered on the dispatch
/// target exactly once per timer lifetime.
pub type DoneHandler = Box<dyn FnMut(&str, &mut Value) + Send>;

/// Everything needed to register a timer, as plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSpec {
    /// Milliseconds between ticks. Must be non-zero.
    pub interval_ms: u64,
    /// Ticks before completion; 0 repeats until cancelled.
    #[serde(default)]
    pub total_count: u32,
    /// Fire a priming tick (`runs = 1`) on registration, outside the budget.
    #[serde(default)]
    pub fire_immediately: bool,
    /// Opaque payload passed to every callback; tick handlers may mutate it.
    #[serde(default)]
    pub param: Value,
}

impl TimerSpec {
    pub fn every(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            total_count: 0,
            fire_immediately: false,
            param: Value::Null,
        }
    }

    pub fn times(mut self, total_count: u32) -> Self {
        self.total_count = total_count;
        self
    }

    pub fn fire_immediately(mut self) -> Self {
        self.fire_immediately = true;
        self
    }

    pub fn with_param(mut self, param: Value) -> Self {
        self.param = param;
        self
    }
}

/// State shared between the registry handle, its driver thread, and the
/// relays baked into each timer.
struct Shared {
    timers: Mutex<HashMap<String, Arc<Mutex<Timer>>>>,
    dispatcher: Arc<dyn Dispatcher>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    shutdown: AtomicBool,
}

/// A panicking user callback poisons the delivery-path locks; keep
/// delivering anyway.
fn lock_ignore_poison<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct RegistryBuilder {
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    driver: DriverConfig,
    spawn_driver: bool,
}

impl RegistryBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn driver_config(mut self, driver: DriverConfig) -> Self {
        self.driver = driver;
        self
    }

    /// Skip the driver thread; the caller advances timers via
    /// [`TimerRegistry::poll`].
    pub fn manual(mut self) -> Self {
        self.spawn_driver = false;
        self
    }

    /// # Errors
    /// Returns an error if the driver thread cannot be spawned.
    pub fn build(self) -> Result<TimerRegistry> {
        let shared = Arc::new(Shared {
            timers: Mutex::new(HashMap::new()),
            dispatcher: self.dispatcher,
            sink: self.sink,
            clock: self.clock,
            shutdown: AtomicBool::new(false),
        });
        let driver = if self.spawn_driver {
            let poll_interval = Duration::from_millis(self.driver.poll_interval_ms);
            shared.sink.publish(Event::DriverStarted {
                poll_interval_ms: self.driver.poll_interval_ms,
                at: Utc::now(),
            });
            let thread_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name("tickloop-driver".into())
                .spawn(move || driver_loop(thread_shared, poll_interval))?;
            Some(handle)
        } else {
            None
        };
        Ok(TimerRegistry { shared, driver })
    }
}

fn driver_loop(shared: Arc<Shared>, poll_interval: Duration) {
    while !shared.shutdown.load(Ordering::Acquire) {
        poll_pass(&shared);
        if poll_interval.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(poll_interval);
        }
    }
    shared.sink.publish(Event::DriverStopped { at: Utc::now() });
}

/// One pass: snapshot the live entries, advance each, reap the exhausted.
fn poll_pass(shared: &Shared) {
    let now = shared.clock.now_ms();
    let snapshot: Vec<(String, Arc<Mutex<Timer>>)> = {
        let timers = shared.timers.lock().unwrap();
        timers
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect()
    };
    for (id, slot) in snapshot {
        let (outcome, ticks) = {
            let mut timer = lock_ignore_poison(&slot);
            let outcome = timer.update(now);
            (outcome, timer.current_count())
        };
        match outcome {
            UpdateOutcome::Exhausted => {
                // The completion relay already removed the entry; this is
                // the defensive fallback. Identity-checked so it cannot
                // reap a replacement scheduled under the same id meanwhile.
                let mut timers = shared.timers.lock().unwrap();
                if timers.get(&id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                    timers.remove(&id);
                }
                drop(timers);
                shared.sink.publish(Event::TimerExhausted {
                    id,
                    ticks,
                    at: Utc::now(),
                });
            }
            UpdateOutcome::Regressed => {
                shared.sink.publish(Event::ClockRegressed { id, at: Utc::now() });
            }
            _ => {}
        }
    }
}

/// Thread-safe multiplexer of [`Timer`]s over one driver thread.
///
/// Dropping the registry shuts the driver down and joins it. Timers do not
/// survive the registry; cancel explicitly if completion callbacks matter.
pub struct TimerRegistry {
    shared: Arc<Shared>,
    driver: Option<JoinHandle<()>>,
}

impl TimerRegistry {
    /// Registry with a background driver, a monotonic clock, default driver
    /// tuning, and no event sink.
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Result<Self> {
        Self::builder(dispatcher).build()
    }

    pub fn builder(dispatcher: Arc<dyn Dispatcher>) -> RegistryBuilder {
        RegistryBuilder {
            dispatcher,
            clock: Arc::new(MonotonicClock::new()),
            sink: Arc::new(NullSink),
            driver: DriverConfig::default(),
            spawn_driver: true,
        }
    }

    /// Register a timer under `id`, replacing (and stopping, with its
    /// completion callback) any live timer already using the id.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for an empty id or a zero interval.
    pub fn schedule(
        &self,
        id: &str,
        spec: TimerSpec,
        on_tick: Option<TickHandler>,
        on_done: Option<DoneHandler>,
    ) -> Result<()> {
        if id.is_empty() {
            return Err(ValidationError::EmptyId.into());
        }
        if spec.interval_ms == 0 {
            return Err(ValidationError::ZeroInterval.into());
        }

        if self.remove_and_stop(id, true) {
            self.shared.sink.publish(Event::TimerReplaced {
                id: id.to_string(),
                at: Utc::now(),
            });
        }

        let run = on_tick.map(|handler| self.tick_relay(id, handler));
        let over = self.over_relay(id, on_done);
        let timer = Timer::new(id, spec.interval_ms, spec.total_count, run, Some(over), spec.param);

        // Insert before starting so a cancel racing the priming tick still
        // finds the entry.
        let slot = Arc::new(Mutex::new(timer));
        self.shared
            .timers
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::clone(&slot));
        lock_ignore_poison(&slot).start(self.shared.clock.now_ms(), spec.fire_immediately);

        self.shared.sink.publish(Event::TimerScheduled {
            id: id.to_string(),
            interval_ms: spec.interval_ms,
            total_count: spec.total_count,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Register under a fresh UUID and return it.
    pub fn schedule_auto(
        &self,
        spec: TimerSpec,
        on_tick: Option<TickHandler>,
        on_done: Option<DoneHandler>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.schedule(&id, spec, on_tick, on_done)?;
        Ok(id)
    }

    /// Infinite ticker: interval only, no completion handler.
    pub fn run_loop(&self, id: &str, interval_ms: u64, on_tick: TickHandler) -> Result<()> {
        self.schedule(id, TimerSpec::every(interval_ms), Some(on_tick), None)
    }

    /// Single-shot delay firing only the completion handler.
    pub fn run_once(&self, id: &str, delay_ms: u64, on_done: DoneHandler) -> Result<()> {
        self.schedule(id, TimerSpec::every(delay_ms).times(1), None, Some(on_done))
    }

    /// Cancel `id` if present; `fire_over` controls completion delivery.
    ///
    /// Cancelling twice, or an unknown id, returns false and delivers
    /// nothing. Cancellation stops new ticks; a delivery already posted to
    /// the dispatch target may still arrive.
    pub fn cancel(&self, id: &str, fire_over: bool) -> bool {
        let slot = self.shared.timers.lock().unwrap().remove(id);
        let Some(slot) = slot else {
            return false;
        };
        let fired = lock_ignore_poison(&slot).stop(fire_over) && fire_over;
        self.shared.sink.publish(Event::TimerCancelled {
            id: id.to_string(),
            fired_over: fired,
            at: Utc::now(),
        });
        true
    }

    /// Drain every timer, stopping each with `fire_over`. Returns how many
    /// were cancelled.
    pub fn cancel_all(&self, fire_over: bool) -> usize {
        let drained: Vec<(String, Arc<Mutex<Timer>>)> = {
            let mut timers = self.shared.timers.lock().unwrap();
            timers.drain().collect()
        };
        let cancelled = drained.len();
        for (_, slot) in drained {
            lock_ignore_poison(&slot).stop(fire_over);
        }
        if cancelled > 0 {
            self.shared.sink.publish(Event::RegistryDrained {
                cancelled,
                fired_over: fire_over,
                at: Utc::now(),
            });
        }
        cancelled
    }

    /// Suspend ticking for `id` without touching its counters. Returns
    /// whether the id was present.
    pub fn pause(&self, id: &str) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        lock_ignore_poison(&slot).pause();
        self.shared.sink.publish(Event::TimerPaused {
            id: id.to_string(),
            at: Utc::now(),
        });
        true
    }

    /// Resume ticking for `id`; time spent paused is not caught up.
    pub fn resume(&self, id: &str) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        lock_ignore_poison(&slot).resume();
        self.shared.sink.publish(Event::TimerResumed {
            id: id.to_string(),
            at: Utc::now(),
        });
        true
    }

    /// Change `id`'s interval; takes effect at its next evaluation.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for a zero interval or an unknown id.
    pub fn set_interval(&self, id: &str, interval_ms: u64) -> Result<()> {
        if interval_ms == 0 {
            return Err(ValidationError::ZeroInterval.into());
        }
        let slot = self
            .slot(id)
            .ok_or_else(|| ValidationError::UnknownId(id.to_string()))?;
        lock_ignore_poison(&slot).set_interval_ms(interval_ms);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.timers.lock().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.shared.timers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all live timers, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.shared.timers.lock().unwrap().keys().cloned().collect()
    }

    /// Run one driver pass now. The background driver calls this
    /// continuously; registries built with [`RegistryBuilder::manual`] are
    /// advanced by calling it directly.
    pub fn poll(&self) {
        poll_pass(&self.shared);
    }

    /// Remove `id` and stop the detached timer. Returns whether it existed.
    fn remove_and_stop(&self, id: &str, fire_over: bool) -> bool {
        let slot = self.shared.timers.lock().unwrap().remove(id);
        match slot {
            Some(slot) => {
                lock_ignore_poison(&slot).stop(fire_over);
                true
            }
            None => false,
        }
    }

    fn slot(&self, id: &str) -> Option<Arc<Mutex<Timer>>> {
        self.shared.timers.lock().unwrap().get(id).map(Arc::clone)
    }

    /// Wrap a user tick handler into the relay stored on the timer: clone
    /// what the delivery needs, post it, catch panics at the boundary.
    fn tick_relay(&self, id: &str, handler: TickHandler) -> RunCallback {
        let id = id.to_string();
        let handler = Arc::new(Mutex::new(handler));
        let dispatcher = Arc::clone(&self.shared.dispatcher);
        let sink = Arc::clone(&self.shared.sink);
        Box::new(move |runs, param| {
            let id = id.clone();
            let handler = Arc::clone(&handler);
            let param = Arc::clone(param);
            let sink = Arc::clone(&sink);
            let task: Task = Box::new(move || {
                let delivery = catch_unwind(AssertUnwindSafe(|| {
                    let mut handler = lock_ignore_poison(&handler);
                    let mut param = lock_ignore_poison(&param);
                    (*handler)(&id, runs, &mut param);
                }));
                if delivery.is_err() {
                    sink.publish(Event::CallbackPanicked {
                        id,
                        stage: CallbackStage::Tick,
                        at: Utc::now(),
                    });
                }
            });
            dispatcher.post(task);
        })
    }

    /// The completion relay also owns map removal: the entry must be gone
    /// before (or synchronously with) the completion delivery so a racing
    /// pass cannot re-deliver for the same id. Holds a weak reference to the
    /// shared state -- a strong one would cycle through the timer it is
    /// stored on.
    fn over_relay(&self, id: &str, handler: Option<DoneHandler>) -> OverCallback {
        let id = id.to_string();
        let handler = handler.map(|h| Arc::new(Mutex::new(h)));
        let registry: Weak<Shared> = Arc::downgrade(&self.shared);
        let dispatcher = Arc::clone(&self.shared.dispatcher);
        let sink = Arc::clone(&self.shared.sink);
        Box::new(move |param| {
            if let Some(shared) = registry.upgrade() {
                shared.timers.lock().unwrap().remove(&id);
            }
            let Some(handler) = handler.as_ref() else {
                return;
            };
            let id = id.clone();
            let handler = Arc::clone(handler);
            let param = Arc::clone(param);
            let sink = Arc::clone(&sink);
            let task: Task = Box::new(move || {
                let delivery = catch_unwind(AssertUnwindSafe(|| {
                    let mut handler = lock_ignore_poison(&handler);
                    let mut param = lock_ignore_poison(&param);
                    (*handler)(&id, &mut param);
                }));
                if delivery.is_err() {
                    sink.publish(Event::CallbackPanicked {
                        id,
                        stage: CallbackStage::Over,
                        at: Utc::now(),
                    });
                }
            });
            dispatcher.post(task);
        })
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }
}
