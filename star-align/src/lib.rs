//! WCS reprojection and asterism-based alignment.

pub mod aligner;
pub mod asterism;
pub mod detect;
pub mod error;
pub mod reproject;

pub use aligner::{align, AlignConfig, AlignMethod, AlignWarningKind, CancelCheck};
pub use asterism::SimilarityTransform;
pub use detect::{detect_bright_sources, Source};
pub use error::{Error, Result};
