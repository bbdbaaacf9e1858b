//! # Tickloop Core Library
//!
//! Cooperative interval timers multiplexed over a single background driver
//! thread.
//!
//! ## Architecture
//!
//! - **Timer**: a self-contained state machine advanced by `update(now)`
//!   calls -- no thread, no I/O of its own
//! - **TimerRegistry**: owns the id -> timer map and the driver thread, and
//!   relays every callback onto an injected dispatch target so user code
//!   never runs on the driver
//! - **Dispatchers**: inline, channel-pump, and tokio implementations of the
//!   dispatch target
//! - **Events**: every registry state change (and every diagnostic, such as
//!   a caught callback panic) is published to an injected sink
//!
//! ## Key Components
//!
//! - [`Timer`]: the interval/repeat-count primitive
//! - [`TimerRegistry`]: thread-safe registration, cancellation, pause/resume
//! - [`Dispatcher`]: where callbacks are delivered
//! - [`Config`]: TOML-backed driver tuning

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod timer;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{config_dir, Config, DriverConfig};
pub use error::{ConfigError, CoreError, Result, ValidationError};
pub use events::{CallbackStage, Event, EventSink, MemorySink, NullSink};
pub use registry::{
    queue, DispatchQueue, Dispatcher, DoneHandler, InlineDispatcher, QueueDispatcher,
    RegistryBuilder, Task, TickHandler, TimerRegistry, TimerSpec, TokioDispatcher,
};
pub use timer::{OverCallback, RunCallback, SharedParam, Timer, UpdateOutcome};
