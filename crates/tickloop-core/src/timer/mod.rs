mod interval;

pub use interval::{OverCallback, RunCallback, SharedParam, Timer, UpdateOutcome};
