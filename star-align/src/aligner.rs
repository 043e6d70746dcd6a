//! `Aligner`: produces an `AlignedSequence` from a `Sequence`, by
//! reprojection or asterism matching, with chunked execution for large runs.

use crate::asterism;
use crate::detect::detect_bright_sources;
use crate::error::{Error, Result};
use crate::reproject;
use log::warn;
use rayon::prelude::*;
use star_types::{AlignedSequence, Frame, Outcome, Sequence, Warning};

/// A callback polled at chunk boundaries; returning `true` aborts the run
/// with [`Error::Cancelled`].
pub type CancelCheck<'a> = dyn Fn() -> bool + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignMethod {
    Reprojection,
    Asterism,
}

#[derive(Debug, Clone)]
pub struct AlignConfig {
    pub method: AlignMethod,
    pub chunk_size: usize,
    pub enable_chunked: bool,
    pub memory_budget: u64,
    pub max_sources: usize,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self { method: AlignMethod::Reprojection, chunk_size: 10, enable_chunked: true, memory_budget: 2_000_000_000, max_sources: 50 }
    }
}

/// Per-frame alignment failures recorded rather than propagated: matches the
/// "fall back to passing the original frame through" policy for both
/// methods' chunked execution.
#[derive(Debug, Clone)]
pub enum AlignWarningKind {
    ResamplingFailed,
    NoMatchableFeatures,
}

fn estimated_bytes(frame_count: usize, width: usize, height: usize) -> u64 {
    (frame_count * width * height * 4) as u64
}

fn align_one_reprojection(frame: &Frame, reference: &Frame, index: usize) -> std::result::Result<Frame, String> {
    reproject::reproject_to_reference(frame, reference, index).map_err(|e| e.to_string())
}

fn align_one_asterism(frame: &Frame, reference: &Frame, reference_sources: &[crate::detect::Source], max_sources: usize, index: usize) -> std::result::Result<Frame, String> {
    let sources = detect_bright_sources(&frame.data, frame.width, frame.height, max_sources).map_err(|e| e.to_string())?;
    let transform = asterism::find_transform(&sources, reference_sources, index).map_err(|e| e.to_string())?;
    let mut out = asterism::apply_transform(frame, &transform, reference.width, reference.height);
    out.wcs = reference.wcs.clone();
    out.source_path = frame.source_path.clone();
    Ok(out)
}

/// Runs alignment over `sequence`, chunking the work when the frame count or
/// estimated memory footprint exceeds configuration. The reference frame
/// (index 0) is always copied through unchanged.
///
/// Fails with [`Error::TooManyUnmatchedFrames`] if asterism matching fails
/// on a majority of the non-reference frames, rather than silently
/// returning a sequence that is mostly unaligned fallbacks.
pub fn align(sequence: &Sequence, config: &AlignConfig, cancel: Option<&CancelCheck>) -> Result<(AlignedSequence, Vec<Warning<AlignWarningKind>>)> {
    let frames = &sequence.frames;
    if frames.is_empty() {
        return Ok((AlignedSequence::new(Vec::new()), Vec::new()));
    }
    let reference = frames[0].clone();

    if config.method == AlignMethod::Reprojection {
        reproject::check_all_have_wcs(frames)?;
        reproject::check_pixel_scales_match(frames)?;
    }

    let reference_sources = if config.method == AlignMethod::Asterism {
        detect_bright_sources(&reference.data, reference.width, reference.height, config.max_sources)?
    } else {
        Vec::new()
    };

    let bytes = estimated_bytes(frames.len(), reference.width, reference.height);
    let use_chunked = config.enable_chunked && (frames.len() > config.chunk_size || bytes > config.memory_budget);
    let chunk_size = if use_chunked { config.chunk_size } else { frames.len().max(1) };

    let mut output = vec![reference.clone(); frames.len()];
    let mut warnings = Vec::new();

    let mut start = 1; // frame 0 is the reference, already placed.
    while start < frames.len() {
        if cancel.map(|f| f()).unwrap_or(false) {
            return Err(Error::Cancelled { stage: "aligning" });
        }
        let end = (start + chunk_size).min(frames.len());
        let results: Vec<(usize, Outcome<Frame, AlignWarningKind>)> = (start..end)
            .into_par_iter()
            .map(|i| {
                let outcome = match config.method {
                    AlignMethod::Reprojection => align_one_reprojection(&frames[i], &reference, i)
                        .map(Outcome::ok)
                        .unwrap_or_else(|message| {
                            Outcome::warned(frames[i].clone(), Warning { index: i, kind: AlignWarningKind::ResamplingFailed, message })
                        }),
                    AlignMethod::Asterism => {
                        align_one_asterism(&frames[i], &reference, &reference_sources, config.max_sources, i)
                            .map(Outcome::ok)
                            .unwrap_or_else(|message| {
                                Outcome::warned(frames[i].clone(), Warning { index: i, kind: AlignWarningKind::NoMatchableFeatures, message })
                            })
                    }
                };
                (i, outcome)
            })
            .collect();

        for (i, outcome) in results {
            match outcome {
                Outcome::Ok(frame) => output[i] = frame,
                Outcome::Warned { value, warning } => {
                    warn!("frame {i} fell back to its unaligned original: {}", warning.message);
                    output[i] = value;
                    warnings.push(warning);
                }
            }
        }
        start = end;
        // Between chunks, transient per-chunk buffers (results, per-source
        // detections) go out of scope here and are dropped before the next
        // iteration allocates.
    }

    if config.method == AlignMethod::Asterism {
        let non_reference = frames.len() - 1;
        if warnings.len() * 2 > non_reference {
            return Err(Error::TooManyUnmatchedFrames { failed: warnings.len(), total: non_reference });
        }
    }

    Ok((AlignedSequence::new(output), warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_types::{FrameKind, Metadata, Wcs};

    fn frame_with_wcs(value: f32) -> Frame {
        let wcs = Wcs {
            ctype1: "RA---TAN".into(),
            ctype2: "DEC--TAN".into(),
            crpix1: 50.0,
            crpix2: 50.0,
            crval1: 10.0,
            crval2: 20.0,
            cd1_1: -1.0 / 3600.0,
            cd1_2: 0.0,
            cd2_1: 0.0,
            cd2_2: 1.0 / 3600.0,
        };
        Frame::new(FrameKind::Light, 100, 100, vec![value; 10000], Metadata::new()).with_wcs(wcs)
    }

    #[test]
    fn reference_frame_passes_through_unchanged() {
        let sequence = Sequence::new(vec![frame_with_wcs(100.0), frame_with_wcs(200.0)]);
        let config = AlignConfig { method: AlignMethod::Reprojection, ..Default::default() };
        let (aligned, _warnings) = align(&sequence, &config, None).unwrap();
        assert_eq!(aligned.frames[0].data, sequence.frames[0].data);
    }

    #[test]
    fn reprojection_precondition_rejects_mismatched_pixel_scale() {
        let mut a = frame_with_wcs(100.0);
        let mut b = frame_with_wcs(100.0);
        if let Some(wcs) = &mut b.wcs {
            wcs.cd1_1 = -1.03 / 3600.0;
            wcs.cd2_2 = 1.03 / 3600.0;
        }
        a.wcs.as_mut().unwrap().cd1_1 = -1.00 / 3600.0;
        let sequence = Sequence::new(vec![a, b]);
        let config = AlignConfig { method: AlignMethod::Reprojection, ..Default::default() };
        assert!(align(&sequence, &config, None).is_err());
    }

    #[test]
    fn cancellation_is_observed_at_the_next_chunk_boundary() {
        let sequence = Sequence::new(vec![frame_with_wcs(100.0), frame_with_wcs(200.0), frame_with_wcs(300.0)]);
        let config = AlignConfig { method: AlignMethod::Reprojection, chunk_size: 1, enable_chunked: true, ..Default::default() };
        let cancel = || true;
        let err = align(&sequence, &config, Some(&cancel)).unwrap_err();
        assert!(matches!(err, Error::Cancelled { stage: "aligning" }));
    }

    #[test]
    fn asterism_majority_failure_is_a_hard_error() {
        // Frames smaller than 3x3 make `detect_bright_sources` short-circuit
        // to an empty source list without touching the SEP FFI, so every
        // frame deterministically fails triangle matching (fewer than 3
        // points on both sides).
        let tiny = || Frame::new(FrameKind::Light, 2, 2, vec![0.0; 4], Metadata::new());
        let sequence = Sequence::new(vec![tiny(), tiny(), tiny()]);
        let config = AlignConfig { method: AlignMethod::Asterism, ..Default::default() };
        let err = align(&sequence, &config, None).unwrap_err();
        assert!(matches!(err, Error::TooManyUnmatchedFrames { failed: 2, total: 2 }));
    }
}
