use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] star_types::Error),

    #[error("no {kind} master available matching frame {frame}")]
    MissingMaster { kind: String, frame: String },

    #[error("sequence for {kind} master is empty")]
    EmptySequence { kind: String },

    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch { expected: (usize, usize), found: (usize, usize) },

    #[error("failed to read calibration library at {path}: {reason}")]
    LibraryUnreadable { path: PathBuf, reason: String },

    #[error("failed to write master to {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
