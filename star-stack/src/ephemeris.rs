//! Ephemeris lookup contract for motion-tracked stacking.

use star_types::EphemerisSample;

/// Supplies apparent position and motion of a named target at given instants.
///
/// Implementations talk to whatever orbit-prediction service is configured
/// (a local JPL Horizons cache, `find_orb`, a network call); this crate only
/// needs the rate and position angle, averaged over the batch, plus the
/// target's position at the reference instant.
pub trait EphemerisSource {
    /// Looks up `target` at every timestamp in `times_unix` (Unix seconds).
    /// Returns one entry per input time, in the same order; `None` marks a
    /// timestamp the source couldn't resolve, which the caller treats as a
    /// soft completeness failure rather than aborting the whole query.
    fn query(&self, target: &str, times_unix: &[f64]) -> crate::error::Result<Vec<Option<EphemerisSample>>>;
}

/// A fixed-rate ephemeris for targets whose motion is well approximated as
/// linear over the batch (most minor-planet stacks at sub-hour timespans).
/// Returns the same sample, unpositioned in time, for every query.
#[derive(Debug, Clone, Copy)]
pub struct LinearEphemeris {
    pub sample: EphemerisSample,
}

impl EphemerisSource for LinearEphemeris {
    fn query(&self, _target: &str, times_unix: &[f64]) -> crate::error::Result<Vec<Option<EphemerisSample>>> {
        Ok(vec![Some(self.sample); times_unix.len()])
    }
}
