//! Task-execution engine: bounded worker pool, retry scheduling with
//! backoff, dead-lettering, progress counters and the idle barrier.

pub mod item;
pub mod pool;
pub mod processor;
pub mod retry;
pub mod stats;

pub use item::WorkItem;
pub use pool::{DEFAULT_CAPACITY, Engine, EngineBuilder, IDLE_POLL_INTERVAL, Lifecycle};
pub use processor::{DeadLetterSink, FnProcessor, Processor, from_fn};
pub use retry::RetryPolicy;
pub use stats::Stats;
