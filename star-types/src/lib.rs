//! Shared data model and error taxonomy for the batch image-reduction pipeline.
//!
//! `Frame`, `FrameKind`, `Sequence` and friends are produced and consumed by
//! every stage crate (`star-io`, `star-calib`, `star-align`, `star-stack`);
//! keeping them here avoids a dependency cycle between the stages.

pub mod error;
pub mod frame;
pub mod metadata;
pub mod outcome;
pub mod sequence;

pub use error::{Error, Result};
pub use frame::{CalibrationManifest, CalibrationMaster, Fingerprint, Frame, FrameKind, Wcs};
pub use metadata::Metadata;
pub use outcome::{Outcome, Warning};
pub use sequence::{AlignedSequence, ConsistencyReport, ConsistencyRule, EphemerisSample, MotionShift, Sequence, StackResult};
