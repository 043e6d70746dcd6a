use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] star_types::Error),

    #[error("alignment precondition failed: {reason}")]
    PreconditionFailed { reason: String },

    #[error("asterism matcher found no solution for frame {index}")]
    NoMatchableFeatures { index: usize },

    #[error("asterism matcher failed on {failed} of {total} frames, exceeding the majority-failure threshold")]
    TooManyUnmatchedFrames { failed: usize, total: usize },

    #[error("resampling failed for frame {index}: {reason}")]
    ResamplingError { index: usize, reason: String },

    #[error("alignment was cancelled during {stage}")]
    Cancelled { stage: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
