//! Event model and the per-event stages that run before delivery.
//!
//! ## Purpose
//! - `normalize`: raw trace event → `EventRecord`
//! - `filter`: per-collector accept/reject predicate
//! - `record`: the record type and its canonical JSON form

pub mod filter;
pub mod normalize;
pub mod record;

pub use filter::FilterSpec;
pub use normalize::{Normalizer, ProcessLookup, SystemProcessLookup};
pub use record::EventRecord;
