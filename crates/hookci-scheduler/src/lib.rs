//! Build scheduling for the hookci build relay.
//!
//! Accepts normalized build requests, creates their records exactly once,
//! runs new builds on a bounded worker pool and publishes completion
//! events to in-process listeners.

pub mod bus;
pub mod dispatcher;
pub mod listener;
pub mod logs;
pub mod worker;

pub use bus::{EventBus, PublishReport};
pub use dispatcher::Dispatcher;
pub use listener::TracingListener;
pub use logs::LogService;
pub use worker::WorkerPool;
