//! Per-frame shift computation, asymmetric padding and resampling for
//! motion-tracked stacking: keeps a moving target fixed in the output frame
//! by shifting every input frame in the opposite direction before combining.

use crate::error::{Error, Result};
use star_types::{EphemerisSample, Frame, MotionShift};

/// Minimum padding applied to a side with no measured excursion, so bilinear
/// resampling always has at least a one-pixel margin to interpolate into.
const MIN_MARGIN_PX: f64 = 2.0;

fn mean(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let count = values.clone().count().max(1) as f64;
    values.sum::<f64>() / count
}

/// Decomposes a motion rate and position angle into (dRA, dDec) arcsec over
/// `delta_t_seconds`. `position_angle_deg` is measured North (0 deg) through
/// East (90 deg), the standard astrometric convention.
fn decompose(rate_arcsec_per_min: f64, position_angle_deg: f64, delta_t_seconds: f64) -> (f64, f64) {
    let magnitude = rate_arcsec_per_min * (delta_t_seconds / 60.0);
    let pa = position_angle_deg.to_radians();
    let dra = magnitude * pa.sin();
    let ddec = magnitude * pa.cos();
    (dra, ddec)
}

/// Computes each frame's pixel shift that keeps the target fixed at the
/// reference frame's pixel position, plus that reference pixel itself.
///
/// `samples[i]` is the ephemeris sample queried at `times_unix[i]`; the
/// average rate and position angle across the batch model the target's
/// motion, applied relative to `samples[reference_index]`'s sky position.
pub fn compute_motion_shifts(
    frames: &[Frame],
    samples: &[EphemerisSample],
    times_unix: &[f64],
    reference_index: usize,
) -> Result<(Vec<MotionShift>, (f64, f64))> {
    if frames.is_empty() {
        return Err(Error::EmptySequence);
    }
    let avg_rate = mean(samples.iter().map(|s| s.rate_arcsec_per_min));
    let avg_pa = mean(samples.iter().map(|s| s.position_angle_deg));
    let reference_sample = samples[reference_index];
    let reference_wcs = frames[reference_index].wcs.as_ref().ok_or(Error::MissingWcs { index: reference_index })?;
    let reference_pixel = reference_wcs.world_to_pixel(reference_sample.ra_deg, reference_sample.dec_deg);

    let dec0 = reference_sample.dec_deg.to_radians();
    let mut shifts = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        let wcs = frame.wcs.as_ref().ok_or(Error::MissingWcs { index: i })?;
        let delta_t = times_unix[i] - times_unix[reference_index];
        let (dra_arcsec, ddec_arcsec) = decompose(avg_rate, avg_pa, delta_t);
        let target_ra = reference_sample.ra_deg + (dra_arcsec / 3600.0) / dec0.cos().max(1e-12);
        let target_dec = reference_sample.dec_deg + ddec_arcsec / 3600.0;
        let (px, py) = wcs.world_to_pixel(target_ra, target_dec);
        shifts.push(MotionShift { dx: reference_pixel.0 - px, dy: reference_pixel.1 - py });
    }
    Ok((shifts, reference_pixel))
}

fn axis_padding(values: impl Iterator<Item = f64> + Clone) -> (usize, usize) {
    let max_pos = values.clone().fold(0.0_f64, |acc, v| acc.max(v));
    let max_neg = values.fold(0.0_f64, |acc, v| acc.max(-v));
    let (pos, neg) = match (max_pos > 0.0, max_neg > 0.0) {
        (true, false) => (max_pos + MIN_MARGIN_PX, 0.0),
        (false, true) => (0.0, max_neg + MIN_MARGIN_PX),
        (false, false) => (MIN_MARGIN_PX, MIN_MARGIN_PX),
        (true, true) => (max_pos + MIN_MARGIN_PX, max_neg + MIN_MARGIN_PX),
    };
    (pos.round() as usize, neg.round() as usize)
}

/// Padding needed on every side of the frame so every shifted frame's
/// resampled content, plus a small interpolation margin, stays in bounds.
/// Returns `(left, right, top, bottom)`.
pub fn required_padding(shifts: &[MotionShift]) -> (usize, usize, usize, usize) {
    let (right, left) = axis_padding(shifts.iter().map(|s| s.dx));
    let (top, bottom) = axis_padding(shifts.iter().map(|s| s.dy));
    (left, right, top, bottom)
}

/// Pads `frame` by replicating its edge pixels, per `(left, right, top, bottom)`.
pub fn pad_edge_replicate(frame: &Frame, padding: (usize, usize, usize, usize)) -> Frame {
    let (left, right, top, bottom) = padding;
    let new_width = frame.width + left + right;
    let new_height = frame.height + top + bottom;
    let mut out = vec![0.0f32; new_width * new_height];
    for oy in 0..new_height {
        let sy = (oy as isize - top as isize).clamp(0, frame.height as isize - 1) as usize;
        for ox in 0..new_width {
            let sx = (ox as isize - left as isize).clamp(0, frame.width as isize - 1) as usize;
            out[oy * new_width + ox] = frame.data[sy * frame.width + sx];
        }
    }
    Frame::new(frame.kind, new_width, new_height, out, frame.metadata.clone())
}

fn bilinear_sample(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> Option<f32> {
    if x < 0.0 || y < 0.0 {
        return None;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    if x0 + 1 >= width || y0 + 1 >= height {
        return None;
    }
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;
    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x0 + 1];
    let v01 = data[(y0 + 1) * width + x0];
    let v11 = data[(y0 + 1) * width + x0 + 1];
    let top = v00 * (1.0 - fx) + v10 * fx;
    let bottom = v01 * (1.0 - fx) + v11 * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Resamples a padded frame by `shift`, filling newly exposed pixels with
/// `fill` (the original, unpadded frame's minimum finite sample).
pub fn shift_bilinear(padded: &Frame, shift: MotionShift, fill: f32) -> Frame {
    let (width, height) = (padded.width, padded.height);
    let mut out = vec![fill; width * height];
    for y in 0..height {
        for x in 0..width {
            let sx = x as f64 - shift.dx;
            let sy = y as f64 - shift.dy;
            if let Some(v) = bilinear_sample(&padded.data, width, height, sx, sy) {
                out[y * width + x] = v;
            }
        }
    }
    Frame::new(padded.kind, width, height, out, padded.metadata.clone())
}

/// Crops a padded-and-shifted frame back to the original `(width, height)`.
pub fn crop_back(padded: &Frame, padding: (usize, usize, usize, usize), width: usize, height: usize) -> Frame {
    let (left, _right, top, _bottom) = padding;
    let mut out = vec![0.0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            out[y * width + x] = padded.data[(y + top) * padded.width + (x + left)];
        }
    }
    Frame::new(padded.kind, width, height, out, padded.metadata.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_types::{FrameKind, Metadata, Wcs};

    fn wcs(crval1: f64, crval2: f64, arcsec_per_pixel: f64) -> Wcs {
        let deg = arcsec_per_pixel / 3600.0;
        Wcs {
            ctype1: "RA---TAN".into(),
            ctype2: "DEC--TAN".into(),
            crpix1: 500.0,
            crpix2: 500.0,
            crval1,
            crval2,
            cd1_1: -deg,
            cd1_2: 0.0,
            cd2_1: 0.0,
            cd2_2: deg,
        }
    }

    #[test]
    fn worked_example_shift_and_padding() {
        use approx::assert_relative_eq;

        // Rate 60 arcsec/min due east (PA 90), pixel scale 1 arcsec/px,
        // reference pixel (500, 500), one hour between the two frames.
        let sample = EphemerisSample { ra_deg: 10.0, dec_deg: 0.0, rate_arcsec_per_min: 60.0, position_angle_deg: 90.0 };
        let frame_a = Frame::new(FrameKind::Light, 1000, 1000, vec![0.0; 1_000_000], Metadata::new()).with_wcs(wcs(10.0, 0.0, 1.0));
        let frame_b = Frame::new(FrameKind::Light, 1000, 1000, vec![0.0; 1_000_000], Metadata::new()).with_wcs(wcs(10.0, 0.0, 1.0));
        let frames = vec![frame_a, frame_b];
        let samples = vec![sample, sample];
        let times = vec![0.0, 3600.0];

        let (shifts, reference_pixel) = compute_motion_shifts(&frames, &samples, &times, 0).unwrap();
        assert_relative_eq!(reference_pixel.0, 500.0, epsilon = 1e-6);
        assert_relative_eq!(reference_pixel.1, 500.0, epsilon = 1e-6);
        assert_relative_eq!(shifts[0].dx, 0.0, epsilon = 1e-6);
        assert_relative_eq!(shifts[0].dy, 0.0, epsilon = 1e-6);
        assert_relative_eq!(shifts[1].dx, 3600.0, epsilon = 1e-6);
        assert_relative_eq!(shifts[1].dy, 0.0, epsilon = 1e-6);

        let padding = required_padding(&shifts);
        assert_eq!(padding, (0, 3602, 2, 2));
    }

    #[test]
    fn pad_then_shift_then_crop_round_trips_a_static_frame() {
        let frame = Frame::new(FrameKind::Light, 4, 4, (0..16).map(|v| v as f32).collect(), Metadata::new());
        let padded = pad_edge_replicate(&frame, (2, 2, 2, 2));
        let shifted = shift_bilinear(&padded, MotionShift::ZERO, frame.min_finite());
        let cropped = crop_back(&shifted, (2, 2, 2, 2), 4, 4);
        assert_eq!(cropped.data, frame.data);
    }
}
