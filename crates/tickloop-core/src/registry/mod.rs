mod dispatch;
mod engine;

pub use dispatch::{
    queue, DispatchQueue, Dispatcher, InlineDispatcher, QueueDispatcher, Task, TokioDispatcher,
};
pub use engine::{DoneHandler, RegistryBuilder, TickHandler, TimerRegistry, TimerSpec};
