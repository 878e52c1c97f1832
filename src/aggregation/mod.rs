//! Emission aggregation.
//!
//! Folds paginated emission records into nested, rounding-stable totals.

pub mod aggregator;
pub mod fixed;
pub mod summary;

pub use aggregator::{AggregateError, AggregationOutcome, Aggregator, GroupBy};
pub use summary::{ranked, shares, top_groups};
