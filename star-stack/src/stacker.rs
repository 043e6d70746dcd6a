//! Top-level stacking operations: plain reduction, motion-tracked reduction,
//! and the inverse lookup from a stacked pixel back to its source frames.

use crate::error::{Error, Result};
use crate::ephemeris::EphemerisSource;
use crate::motion;
use crate::reduce::{combine_frames, scale_frames};
use log::{info, warn};
use star_calib::ReduceOp;
use star_types::{AlignedSequence, Frame, StackResult};

/// Tracks progress through a stack operation for logging and cancellation
/// checks. Every non-terminal state can transition to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Idle,
    Validating,
    ComputingShifts,
    Padding,
    Reducing,
    Finalizing,
    Done,
    Failed,
}

/// A callback polled at stripe/chunk boundaries; returning `true` aborts the
/// run with [`Error::Cancelled`].
pub type CancelCheck<'a> = dyn Fn() -> bool + 'a;

#[derive(Clone)]
pub struct StackConfig<'a> {
    pub op: ReduceOp,
    pub sigma_clip: bool,
    pub sigma_low: f64,
    pub sigma_high: f64,
    /// Per-frame scale applied before combining, e.g. exposure or flux
    /// normalization. `None` for plain equal-weight combine.
    pub scale_fn: Option<&'a dyn Fn(&Frame) -> f64>,
    pub memory_limit: u64,
    pub chunk_size: usize,
    pub force_chunked: bool,
    pub max_images: usize,
}

impl<'a> Default for StackConfig<'a> {
    fn default() -> Self {
        Self {
            op: ReduceOp::Mean,
            sigma_clip: true,
            sigma_low: 4.0,
            sigma_high: 3.0,
            scale_fn: None,
            memory_limit: 2_000_000_000,
            chunk_size: 10,
            force_chunked: false,
            max_images: 500,
        }
    }
}

impl<'a> StackConfig<'a> {
    /// Row-stripe height to use instead of deriving one from `memory_limit`,
    /// when `force_chunked` asks for `chunk_size` directly.
    fn chunk_rows_override(&self) -> Option<usize> {
        self.force_chunked.then_some(self.chunk_size)
    }

    fn apply_scale(&self, frames: &[Frame]) -> Vec<Frame> {
        match self.scale_fn {
            Some(f) => scale_frames(frames, &frames.iter().map(|frame| f(frame)).collect::<Vec<_>>()),
            None => frames.to_vec(),
        }
    }
}

fn check_cancel(cancel: Option<&CancelCheck>, stage: &'static str) -> Result<()> {
    if cancel.map(|f| f()).unwrap_or(false) {
        return Err(Error::Cancelled { stage });
    }
    Ok(())
}

fn reduce_op_name(op: ReduceOp) -> &'static str {
    match op {
        ReduceOp::Mean => "average",
        ReduceOp::Median => "median",
        ReduceOp::Sum => "sum",
    }
}

/// Stamps the provenance keys spec §6 requires into the stacked frame's own
/// header, so saving it through [`star_io::save`] and reloading it later
/// carries enough to reconstruct a [`StackResult`] for [`inverse_lookup`].
fn stamp_provenance(result: &mut StackResult, chunk_count: usize) {
    let meta = &mut result.frame.metadata;
    meta.set("COMBINED", "T");
    meta.set("MOTION_TRACKED", if result.motion_tracked { "T" } else { "F" });
    if let Some(object) = &result.tracked_object {
        meta.set("TRACKED_OBJECT", object.clone());
    }
    if let Some(time) = &result.reference_time {
        meta.set("REFERENCE_TIME", time.clone());
    }
    meta.set("MOTION_SHIFTS", serde_json::to_string(&result.shifts).expect("MotionShift always serializes"));
    meta.set("ORIGINAL_FILES", serde_json::to_string(&result.original_files).expect("strings always serialize"));
    meta.set("PADDING", serde_json::to_string(&result.padding).expect("tuple always serializes"));
    if let Some(reference_pixel) = result.reference_pixel {
        meta.set("REFERENCE_POSITION", serde_json::to_string(&reference_pixel).expect("tuple always serializes"));
    }
    meta.set("CHUNKED_PROCESSING", if chunk_count > 1 { "T" } else { "F" });
    meta.set("TOTAL_CHUNKS", chunk_count.to_string());
}

/// Straight sigma-clipped reduction of an already-aligned sequence: no
/// per-frame shifting.
pub fn stack(sequence: &AlignedSequence, config: &StackConfig, cancel: Option<&CancelCheck>) -> Result<StackResult> {
    if sequence.frames.is_empty() {
        return Err(Error::EmptySequence);
    }
    if sequence.frames.len() > config.max_images {
        return Err(Error::TooManyFrames { count: sequence.frames.len(), max: config.max_images });
    }
    check_cancel(cancel, "validating")?;

    info!("stacking {} frames with {:?}", sequence.frames.len(), config.op);
    let scaled = config.apply_scale(&sequence.frames);
    let (data, width, height, rejected, chunk_count) = combine_frames(
        &scaled,
        config.op,
        config.sigma_clip,
        config.sigma_low,
        config.sigma_high,
        config.memory_limit,
        config.chunk_rows_override(),
        cancel,
    )?;
    if rejected > 0 {
        info!("sigma-clip rejected {rejected} samples across the stack");
    }

    let reference = &sequence.frames[0];
    let mut frame = Frame::new(reference.kind, width, height, data, reference.metadata.clone());
    frame.wcs = reference.wcs.clone();

    let mut result = StackResult {
        frame,
        method: reduce_op_name(config.op).to_string(),
        sigma_low: config.sigma_clip.then_some(config.sigma_low),
        sigma_high: config.sigma_clip.then_some(config.sigma_high),
        motion_tracked: false,
        tracked_object: None,
        reference_time: None,
        total_chunks: Some(chunk_count),
        shifts: Vec::new(),
        original_files: sequence.frames.iter().filter_map(|f| f.source_path.clone()).collect(),
        padding: (0, 0, 0, 0),
        reference_pixel: None,
    };
    stamp_provenance(&mut result, chunk_count);
    Ok(result)
}

/// Motion-tracked reduction: computes per-frame shifts that keep `target`
/// fixed, pads and resamples every frame, reduces, then crops back.
pub fn motion_stack(
    sequence: &AlignedSequence,
    ephemeris: &dyn EphemerisSource,
    target: &str,
    times_unix: &[f64],
    reference_time: Option<&str>,
    reference_index: Option<usize>,
    config: &StackConfig,
    cancel: Option<&CancelCheck>,
) -> Result<StackResult> {
    if sequence.frames.is_empty() {
        return Err(Error::EmptySequence);
    }
    if sequence.frames.len() != times_unix.len() {
        return Err(Error::ShapeMismatch { index: 0, expected: (times_unix.len(), 1), found: (sequence.frames.len(), 1) });
    }
    if sequence.frames.len() > config.max_images {
        return Err(Error::TooManyFrames { count: sequence.frames.len(), max: config.max_images });
    }
    check_cancel(cancel, "validating")?;

    let samples = ephemeris.query(target, times_unix)?;
    let missing = samples.iter().filter(|s| s.is_none()).count();
    if missing == samples.len() {
        return Err(Error::EphemerisUnavailable { target: target.to_string() });
    }
    if missing > 0 {
        return Err(Error::EphemerisIncomplete { missing, total: samples.len() });
    }
    let samples: Vec<_> = samples.into_iter().map(Option::unwrap).collect();

    check_cancel(cancel, "computing_shifts")?;
    let reference_index = reference_index.unwrap_or_else(|| {
        times_unix
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap_or(0)
    });
    let (shifts, reference_pixel) = motion::compute_motion_shifts(&sequence.frames, &samples, times_unix, reference_index)?;

    check_cancel(cancel, "padding")?;
    let padding = motion::required_padding(&shifts);
    let (original_width, original_height) = (sequence.frames[0].width, sequence.frames[0].height);

    let scaled = config.apply_scale(&sequence.frames);
    let mut shifted_frames = Vec::with_capacity(scaled.len());
    for (frame, shift) in scaled.iter().zip(shifts.iter()) {
        check_cancel(cancel, "padding")?;
        let fill = frame.min_finite();
        let padded = motion::pad_edge_replicate(frame, padding);
        let shifted = motion::shift_bilinear(&padded, *shift, fill);
        shifted_frames.push(shifted);
    }

    check_cancel(cancel, "reducing")?;
    let (data, padded_width, padded_height, rejected, chunk_count) = combine_frames(
        &shifted_frames,
        config.op,
        config.sigma_clip,
        config.sigma_low,
        config.sigma_high,
        config.memory_limit,
        config.chunk_rows_override(),
        cancel,
    )?;
    if rejected > 0 {
        info!("motion-tracked sigma-clip rejected {rejected} samples across the stack");
    }
    let reference = &sequence.frames[0];
    let mut padded_frame = Frame::new(reference.kind, padded_width, padded_height, data, reference.metadata.clone());
    padded_frame.wcs = None; // the padded/shifted canvas no longer matches any single frame's plate solution.

    check_cancel(cancel, "finalizing")?;
    let frame = motion::crop_back(&padded_frame, padding, original_width, original_height);
    if padding.0 + padding.1 >= padded_width || padding.2 + padding.3 >= padded_height {
        warn!("motion-tracking padding consumed the entire frame; crop result may be degenerate");
    }

    let mut result = StackResult {
        frame,
        method: reduce_op_name(config.op).to_string(),
        sigma_low: config.sigma_clip.then_some(config.sigma_low),
        sigma_high: config.sigma_clip.then_some(config.sigma_high),
        motion_tracked: true,
        tracked_object: Some(target.to_string()),
        reference_time: reference_time.map(str::to_string),
        total_chunks: Some(chunk_count),
        shifts,
        original_files: sequence.frames.iter().filter_map(|f| f.source_path.clone()).collect(),
        padding,
        reference_pixel: Some(reference_pixel),
    };
    stamp_provenance(&mut result, chunk_count);
    Ok(result)
}

/// Where a stacked pixel came from: the stacked frame itself (unchanged,
/// first entry) and each motion-tracked input frame it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct InverseLocation {
    pub label: String,
    pub pixel: (f64, f64),
}

/// Maps a pixel in a motion-tracked [`StackResult`] back to the pixel it
/// came from in the stacked frame itself and in every contributing original
/// frame, mirroring the Python inverse lookup's per-input-path result list.
pub fn inverse_lookup(result: &StackResult, cursor_x: f64, cursor_y: f64) -> Vec<InverseLocation> {
    let mut locations = vec![InverseLocation { label: "stacked".to_string(), pixel: (cursor_x, cursor_y) }];
    for (index, shift) in result.shifts.iter().enumerate() {
        let label = result.original_files.get(index).cloned().unwrap_or_else(|| format!("frame_{index}"));
        locations.push(InverseLocation { label, pixel: shift.invert_point(cursor_x, cursor_y) });
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::LinearEphemeris;
    use star_types::{EphemerisSample, FrameKind, Metadata, MotionShift, Wcs};

    fn frame(value: f32) -> Frame {
        Frame::new(FrameKind::Light, 4, 4, vec![value; 16], Metadata::new())
    }

    #[test]
    fn plain_stack_of_identical_frames_is_a_no_op() {
        let sequence = AlignedSequence::new(vec![frame(5.0), frame(5.0), frame(5.0)]);
        let result = stack(&sequence, &StackConfig::default(), None).unwrap();
        assert_eq!(result.frame.data, vec![5.0; 16]);
        assert!(!result.motion_tracked);
    }

    #[test]
    fn empty_sequence_is_rejected() {
        let sequence = AlignedSequence::new(Vec::new());
        assert!(matches!(stack(&sequence, &StackConfig::default(), None), Err(Error::EmptySequence)));
    }

    fn wcs(arcsec_per_pixel: f64) -> Wcs {
        let deg = arcsec_per_pixel / 3600.0;
        Wcs { ctype1: "RA---TAN".into(), ctype2: "DEC--TAN".into(), crpix1: 500.0, crpix2: 500.0, crval1: 10.0, crval2: 0.0, cd1_1: -deg, cd1_2: 0.0, cd2_1: 0.0, cd2_2: deg }
    }

    #[test]
    fn motion_stack_records_the_worked_example_shifts_and_inverts_them() {
        let sample = EphemerisSample { ra_deg: 10.0, dec_deg: 0.0, rate_arcsec_per_min: 60.0, position_angle_deg: 90.0 };
        let f0 = Frame::new(FrameKind::Light, 1000, 1000, vec![1.0; 1_000_000], Metadata::new()).with_wcs(wcs(1.0));
        let f1 = Frame::new(FrameKind::Light, 1000, 1000, vec![1.0; 1_000_000], Metadata::new()).with_wcs(wcs(1.0));
        let sequence = AlignedSequence::new(vec![f0, f1]);
        let ephemeris = LinearEphemeris { sample };
        let result = motion_stack(&sequence, &ephemeris, "test-object", &[0.0, 3600.0], None, None, &StackConfig::default(), None).unwrap();

        assert!(result.motion_tracked);
        assert_eq!(result.shifts.len(), 2);
        assert!((result.shifts[1].dx - 3600.0).abs() < 1e-6);
        assert!((result.shifts[1].dy - 0.0).abs() < 1e-6);
        assert_eq!(result.padding, (0, 3602, 2, 2));

        let located = inverse_lookup(&result, 500.0, 500.0);
        assert_eq!(located[0].pixel, (500.0, 500.0));
        assert_eq!(located[1].pixel, (500.0, 500.0));
        assert_eq!(located[2].pixel, (-3100.0, 500.0));
    }

    #[test]
    fn scale_fn_normalizes_before_combining() {
        let sequence = AlignedSequence::new(vec![frame(10.0), frame(20.0)]);
        let halve_the_second: &dyn Fn(&Frame) -> f64 = &|f| if f.data[0] > 15.0 { 0.5 } else { 1.0 };
        let config = StackConfig { scale_fn: Some(halve_the_second), ..StackConfig::default() };
        let result = stack(&sequence, &config, None).unwrap();
        assert_eq!(result.frame.data, vec![10.0; 16]);
    }

    #[test]
    fn plain_stack_stamps_provenance_keys_into_the_output_header() {
        let sequence = AlignedSequence::new(vec![frame(5.0), frame(5.0)]);
        let result = stack(&sequence, &StackConfig::default(), None).unwrap();
        assert_eq!(result.frame.metadata.get_bool("COMBINED"), Some(true));
        assert_eq!(result.frame.metadata.get_bool("MOTION_TRACKED"), Some(false));
        assert_eq!(result.frame.metadata.get_str("MOTION_SHIFTS"), Some("[]"));
        assert_eq!(result.frame.metadata.get_bool("CHUNKED_PROCESSING"), Some(false));
        assert_eq!(result.frame.metadata.get_i64("TOTAL_CHUNKS"), Some(1));
        assert!(result.frame.metadata.get_str("TRACKED_OBJECT").is_none());
    }

    #[test]
    fn motion_stack_stamps_shifts_padding_and_reference_position() {
        let sample = EphemerisSample { ra_deg: 10.0, dec_deg: 0.0, rate_arcsec_per_min: 60.0, position_angle_deg: 90.0 };
        let f0 = Frame::new(FrameKind::Light, 1000, 1000, vec![1.0; 1_000_000], Metadata::new()).with_wcs(wcs(1.0));
        let f1 = Frame::new(FrameKind::Light, 1000, 1000, vec![1.0; 1_000_000], Metadata::new()).with_wcs(wcs(1.0));
        let sequence = AlignedSequence::new(vec![f0, f1]);
        let ephemeris = LinearEphemeris { sample };
        let result = motion_stack(&sequence, &ephemeris, "test-object", &[0.0, 3600.0], Some("2024-01-01T00:00:00"), None, &StackConfig::default(), None).unwrap();

        assert_eq!(result.frame.metadata.get_bool("MOTION_TRACKED"), Some(true));
        assert_eq!(result.frame.metadata.get_str("TRACKED_OBJECT"), Some("test-object"));
        assert_eq!(result.frame.metadata.get_str("REFERENCE_TIME"), Some("2024-01-01T00:00:00"));
        let shifts: Vec<MotionShift> = serde_json::from_str(result.frame.metadata.get_str("MOTION_SHIFTS").unwrap()).unwrap();
        assert_eq!(shifts, result.shifts);
        let padding: (usize, usize, usize, usize) = serde_json::from_str(result.frame.metadata.get_str("PADDING").unwrap()).unwrap();
        assert_eq!(padding, result.padding);
        let reference_position: (f64, f64) = serde_json::from_str(result.frame.metadata.get_str("REFERENCE_POSITION").unwrap()).unwrap();
        assert_eq!(reference_position, result.reference_pixel.unwrap());
    }
}
