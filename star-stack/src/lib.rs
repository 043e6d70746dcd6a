//! Sigma-clipped reduction and motion-tracked stacking.
//!
//! [`stacker::stack`] combines an already-aligned sequence in place.
//! [`stacker::motion_stack`] additionally shifts every frame to keep a named,
//! moving target fixed before combining, and records enough provenance
//! ([`star_types::StackResult`]) to map a pixel in the result back to the
//! frame it came from via [`stacker::inverse_lookup`].

pub mod ephemeris;
pub mod error;
pub mod motion;
pub mod reduce;
pub mod stacker;

pub use ephemeris::{EphemerisSource, LinearEphemeris};
pub use error::{Error, Result};
pub use reduce::combine_frames;
pub use stacker::{inverse_lookup, motion_stack, stack, CancelCheck, InverseLocation, StackConfig, StackState};
