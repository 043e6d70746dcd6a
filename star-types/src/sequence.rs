//! `Sequence`, its consistency check, and the types that describe an
//! aligned and a stacked sequence.

use crate::error::Error;
use crate::frame::Frame;
use serde::{Deserialize, Serialize};

/// Per-key tolerance used by the sequence consistency check.
/// `tolerance == 0.0` requires an exact match across the sequence.
#[derive(Debug, Clone)]
pub struct ConsistencyRule {
    pub key: String,
    pub tolerance: f64,
}

/// Result of checking a sequence against a set of [`ConsistencyRule`]s.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub checked_keys: Vec<String>,
    pub consistent: bool,
}

/// Ordered list of frames plus the result of their last consistency check.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub frames: Vec<Frame>,
}

impl Sequence {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Checks header consistency across the sequence. For `tolerance == 0`,
    /// every frame's string value for the key must be identical. For
    /// `tolerance > 0`, numeric values must all fall within `tolerance` of
    /// their mean.
    pub fn check_consistency(&self, rules: &[ConsistencyRule]) -> Result<ConsistencyReport, Error> {
        let mut checked = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.tolerance == 0.0 {
                let mut values: Vec<String> = self
                    .frames
                    .iter()
                    .filter_map(|f| f.metadata.get_str(&rule.key).map(str::to_string))
                    .collect();
                values.dedup();
                let distinct: std::collections::BTreeSet<_> = values.iter().cloned().collect();
                if distinct.len() > 1 {
                    return Err(Error::InconsistentSequence {
                        key: rule.key.clone(),
                        values: distinct.into_iter().collect(),
                        tolerance: rule.tolerance,
                    });
                }
            } else {
                let values: Vec<f64> =
                    self.frames.iter().filter_map(|f| f.metadata.get_f64(&rule.key)).collect();
                if values.is_empty() {
                    checked.push(rule.key.clone());
                    continue;
                }
                let average = values.iter().sum::<f64>() / values.len() as f64;
                let max_deviation =
                    values.iter().map(|v| (v - average).abs()).fold(0.0_f64, f64::max);
                if max_deviation > rule.tolerance {
                    return Err(Error::InconsistentSequence {
                        key: rule.key.clone(),
                        values: values.iter().map(|v| v.to_string()).collect(),
                        tolerance: rule.tolerance,
                    });
                }
            }
            checked.push(rule.key.clone());
        }
        Ok(ConsistencyReport { checked_keys: checked, consistent: true })
    }
}

/// Ordered list of frames sharing pixel dimensions and (where applicable) a
/// WCS, indexed by original position so outputs can be mapped back to inputs.
#[derive(Debug, Clone)]
pub struct AlignedSequence {
    pub frames: Vec<Frame>,
    /// Original sequence index that produced `frames[i]`; identity unless a
    /// chunked run reordered work (it never does — order is preserved).
    pub original_index: Vec<usize>,
}

impl AlignedSequence {
    pub fn new(frames: Vec<Frame>) -> Self {
        let original_index = (0..frames.len()).collect();
        Self { frames, original_index }
    }

    pub fn reference(&self) -> Option<&Frame> {
        self.frames.first()
    }
}

/// Per-frame pixel translation that keeps a named target fixed relative to
/// the reference exposure time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionShift {
    pub dx: f64,
    pub dy: f64,
}

impl MotionShift {
    pub const ZERO: MotionShift = MotionShift { dx: 0.0, dy: 0.0 };

    /// `original = cursor - shift`, the exact (non-interpolated) inverse of
    /// the forward pixel shift applied before stacking.
    pub fn invert_point(&self, cursor_x: f64, cursor_y: f64) -> (f64, f64) {
        (cursor_x - self.dx, cursor_y - self.dy)
    }
}

/// A single ephemeris query result: position and apparent motion of a
/// target at one instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EphemerisSample {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub rate_arcsec_per_min: f64,
    pub position_angle_deg: f64,
}

/// Metadata describing how a [`crate::frame::Frame`] was produced by the
/// stacker: method, rejection thresholds, motion-tracking provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackResult {
    pub frame: Frame,
    pub method: String,
    pub sigma_low: Option<f64>,
    pub sigma_high: Option<f64>,
    pub motion_tracked: bool,
    pub tracked_object: Option<String>,
    pub reference_time: Option<String>,
    pub total_chunks: Option<usize>,
    /// Per-frame shift, in original sequence order; empty when not motion-tracked.
    pub shifts: Vec<MotionShift>,
    pub original_files: Vec<String>,
    /// (left, right, top, bottom) padding applied before shifting.
    pub padding: (usize, usize, usize, usize),
    pub reference_pixel: Option<(f64, f64)>,
}
