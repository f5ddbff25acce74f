//! Core data model.
//!
//! A work record is the persisted side of a unit of work: what was asked for,
//! whether it is done, and what it produced.

pub mod work;

pub use work::{NewWorkRecord, Status, WorkId, WorkRecord};
