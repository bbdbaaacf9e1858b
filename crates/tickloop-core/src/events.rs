//! Registry event stream.
//!
//! Every registry state change produces an [`Event`] published to an
//! injected [`EventSink`]. Embedders subscribe for observability; the CLI
//! prints them; tests assert on them. Callback panics and clock regressions
//! surface here too -- they are diagnostics, not caller-visible errors.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which callback a delivery failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStage {
    Tick,
    Over,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerScheduled {
        id: String,
        interval_ms: u64,
        total_count: u32,
        at: DateTime<Utc>,
    },
    /// A live timer was superseded by a `schedule` call reusing its id.
    TimerReplaced {
        id: String,
        at: DateTime<Utc>,
    },
    /// A timer spent its repeat budget and removed itself.
    TimerExhausted {
        id: String,
        ticks: u32,
        at: DateTime<Utc>,
    },
    TimerCancelled {
        id: String,
        fired_over: bool,
        at: DateTime<Utc>,
    },
    TimerPaused {
        id: String,
        at: DateTime<Utc>,
    },
    TimerResumed {
        id: String,
        at: DateTime<Utc>,
    },
    /// `cancel_all` drained the registry.
    RegistryDrained {
        cancelled: usize,
        fired_over: bool,
        at: DateTime<Utc>,
    },
    /// A user callback panicked during delivery; the timer keeps running.
    CallbackPanicked {
        id: String,
        stage: CallbackStage,
        at: DateTime<Utc>,
    },
    /// The clock reported a timestamp before a timer's interval window;
    /// the window was restarted without firing.
    ClockRegressed {
        id: String,
        at: DateTime<Utc>,
    },
    DriverStarted {
        poll_interval_ms: u64,
        at: DateTime<Utc>,
    },
    DriverStopped {
        at: DateTime<Utc>,
    },
}

/// Receives every registry event. Implementations must be cheap and
/// non-blocking; the driver thread publishes directly.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: Event) {}
}

/// Buffers events in memory for tests and status inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything published so far.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Remove and return everything published so far.
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
