//! # workq
//!
//! In-process asynchronous work queue.
//!
//! Provides a bounded worker pool with retry, exponential backoff and
//! dead-lettering (`engine`), an idempotent record registry with memory,
//! Redis and Postgres backends (`store`), the admission path joining the
//! two (`admission`), and tracing / OpenTelemetry setup (`telemetry`).

pub mod admission;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod telemetry;
