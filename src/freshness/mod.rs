//! Device liveness: the pure classifier and the per-device state it reads.

pub mod evaluator;
pub mod tracker;

pub use evaluator::{classify, Freshness, Thresholds};
pub use tracker::{FreshnessState, FreshnessTracker};
