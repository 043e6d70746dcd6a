//! Error taxonomy for reduction and motion-tracked stacking.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] star_types::Error),

    #[error("stack requires at least one frame")]
    EmptySequence,

    #[error("frame {index} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch { index: usize, expected: (usize, usize), found: (usize, usize) },

    #[error("no ephemeris data available for target {target:?}")]
    EphemerisUnavailable { target: String },

    #[error("ephemeris source returned no sample for {missing} of {total} requested times")]
    EphemerisIncomplete { missing: usize, total: usize },

    #[error("motion-tracked stack requires per-frame WCS, frame {index} has none")]
    MissingWcs { index: usize },

    #[error("estimated memory footprint {needed} bytes exceeds budget {budget} bytes")]
    MemoryBudgetExceeded { needed: u64, budget: u64 },

    #[error("stack was cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("sequence has {count} frames, exceeding the configured maximum of {max}")]
    TooManyFrames { count: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
