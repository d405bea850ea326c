// src/core/mod.rs

/// Data structures shared across the pipeline: candidates, fetch outcomes,
/// match records and run summaries.
pub mod models;

/// Error taxonomy for configuration, input and per-line failures.
pub mod error;

/// The read-only table of named fingerprint rules.
pub mod registry;

/// Expands input lines into ordered candidate URLs.
pub mod candidates;

/// The bounded worker pool that drives work units.
pub mod pool;

/// The mutually exclusive writer for results and progress lines.
pub mod sink;

/// Fetching, matching, and the per-line work unit.
pub mod scanner;
