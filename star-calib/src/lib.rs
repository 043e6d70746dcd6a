//! Calibration master indexing/building and per-frame calibration.

pub mod calibrator;
pub mod combine;
pub mod error;
pub mod library;

pub use calibrator::{calibrate, CalibrationOverrides, CalibrationSteps};
pub use combine::{combine, combine_with_budget, sigma_clip, ReduceOp};
pub use error::{Error, Result};
pub use library::{CalibrationLibrary, MatchTolerances};
