//! Rule aggregation
//!
//! Combines the verdicts of the configured rule providers into a single
//! decision per request, or per item for batched requests.

pub mod engine;

pub use engine::{BatchVerdict, Ruler};
