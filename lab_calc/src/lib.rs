//! lab_calc
//!
//! Side-effect free numeric engines: plate compression layout, conversion of
//! instrument readings into concentrations, normalization dispense volumes and
//! the pooling strategies. Everything here is deterministic; the same inputs
//! always produce bit-identical outputs, so persisted results can be replayed.

// Warning groups
#![deny(future_incompatible, nonstandard_style, rust_2018_idioms)]

pub mod compression;
pub mod concentration;
pub mod normalization;
pub mod pooling;

/// Tolerance used when checking that pool percentages sum to one.
pub const PERCENTAGE_TOLERANCE: f64 = 1e-6;
