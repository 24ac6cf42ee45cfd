//! Worker pool and callback dispatch for the network orchestrator.

mod dispatch;
mod metrics;
mod pool;

pub use dispatch::Dispatcher;
pub use pool::{Shutdown, ThreadPool};
