//! Per-item outcome for operations where a single bad frame must not abort
//! a whole sequence.
//!
//! Hard failures (shape mismatch, precondition failures, memory budget)
//! propagate as `Err` through ordinary `Result`s. Soft failures (a missing
//! calibration master, an alignment failure on one frame, an ephemeris miss
//! for one timestamp) use `Outcome` so the frame can flow through an
//! iterator pipeline with an attached warning instead of short-circuiting
//! the whole batch.

use std::fmt;

/// A successfully produced value, or the original input plus a recorded warning.
#[derive(Debug, Clone)]
pub enum Outcome<T, F> {
    Ok(T),
    Warned { value: T, warning: Warning<F> },
}

impl<T, F> Outcome<T, F> {
    pub fn ok(value: T) -> Self {
        Outcome::Ok(value)
    }

    pub fn warned(value: T, warning: Warning<F>) -> Self {
        Outcome::Warned { value, warning }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Ok(v) => v,
            Outcome::Warned { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Ok(v) => v,
            Outcome::Warned { value, .. } => value,
        }
    }

    pub fn warning(&self) -> Option<&Warning<F>> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Warned { warning, .. } => Some(warning),
        }
    }

    pub fn is_warned(&self) -> bool {
        matches!(self, Outcome::Warned { .. })
    }
}

/// A recorded soft-failure annotation: which input slot it applies to, and why.
#[derive(Debug, Clone)]
pub struct Warning<F> {
    /// Stable input index, so annotations survive any worker-scheduling reorder.
    pub index: usize,
    pub kind: F,
    pub message: String,
}

impl<F: fmt::Debug> fmt::Display for Warning<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame[{}]: {:?}: {}", self.index, self.kind, self.message)
    }
}
