//! Shared error taxonomy.
//!
//! Every stage-specific crate (`star-io`, `star-calib`, `star-align`,
//! `star-stack`) defines its own `Error` enum for stage-local failure modes,
//! but the failures that can occur during frame loading, validation and
//! sequence consistency checking are common to all of them and live here so
//! downstream crates can match on them without a dependency cycle.

use std::path::PathBuf;
use thiserror::Error;

/// Failures that can occur while loading, validating or grouping frames.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{path}: not a readable container ({reason})")]
    BadContainer { path: PathBuf, reason: String },

    #[error("{path}: expected a 2D image, found {naxis} axes")]
    WrongDimensionality { path: PathBuf, naxis: usize },

    #[error("{path}: image too small ({width}x{height}, minimum is 100x100)")]
    TooSmall { path: PathBuf, width: usize, height: usize },

    #[error("{path}: no contrast (min == max, or stddev {stddev} < 1.0)")]
    NoContrast { path: PathBuf, stddev: f32 },

    #[error("{path}: frame too dark (mean {mean} < 10 and max {max} < 50)")]
    TooDark { path: PathBuf, mean: f32, max: f32 },

    #[error("sequence inconsistent on {key}: values {values:?} exceed tolerance {tolerance}")]
    InconsistentSequence { key: String, values: Vec<String>, tolerance: f64 },

    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch { expected: (usize, usize), found: (usize, usize) },

    #[error("operation cancelled")]
    Cancelled,
}

/// Result alias for this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
