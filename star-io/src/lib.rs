//! Container (FITS) loading, validation and saving.

pub mod container;
pub mod report;

pub use container::{load, save, validate};
pub use report::{validate_report, ValidationReport};
