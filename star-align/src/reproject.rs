//! WCS reprojection: resamples every frame onto frame 0's pixel grid.

use crate::error::{Error, Result};
use star_types::{Frame, Wcs};

const PIXEL_SCALE_TOLERANCE_ARCSEC: f64 = 0.01;

/// Every frame has a celestial WCS attached.
pub fn check_all_have_wcs(frames: &[Frame]) -> Result<()> {
    for frame in frames {
        match &frame.wcs {
            Some(wcs) if wcs.is_celestial() => {}
            _ => return Err(Error::PreconditionFailed { reason: "missing celestial WCS".to_string() }),
        }
    }
    Ok(())
}

/// Pixel scales (arcsec/pixel) agree across the sequence within tolerance.
pub fn check_pixel_scales_match(frames: &[Frame]) -> Result<()> {
    let mut scales = frames.iter().filter_map(|f| f.wcs.as_ref().map(Wcs::pixel_scale_arcsec));
    let Some(reference) = scales.next() else {
        return Err(Error::PreconditionFailed { reason: "no WCS to establish a reference pixel scale".to_string() });
    };
    for (ra_scale, dec_scale) in scales {
        if (ra_scale - reference.0).abs() > PIXEL_SCALE_TOLERANCE_ARCSEC
            || (dec_scale - reference.1).abs() > PIXEL_SCALE_TOLERANCE_ARCSEC
        {
            return Err(Error::PreconditionFailed { reason: "pixel scale mismatch".to_string() });
        }
    }
    Ok(())
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

/// Resamples `frame` onto `reference`'s pixel grid by composing `frame`'s
/// WCS (pixel -> world) with `reference`'s WCS (world -> pixel).
pub fn reproject_to_reference(frame: &Frame, reference: &Frame, index: usize) -> Result<Frame> {
    let source_wcs = frame.wcs.as_ref().ok_or(Error::PreconditionFailed { reason: "frame has no WCS".into() })?;
    let reference_wcs = reference.wcs.as_ref().ok_or(Error::PreconditionFailed { reason: "reference has no WCS".into() })?;

    let width = reference.width;
    let height = reference.height;
    let mut out = vec![0.0f32; width * height];
    let fill = frame.min_finite();

    for y in 0..height {
        for x in 0..width {
            let (ra, dec) = reference_wcs.pixel_to_world(x as f64, y as f64);
            let (sx, sy) = source_wcs.world_to_pixel(ra, dec);
            out[y * width + x] = bilinear_sample(&frame.data, frame.width, frame.height, sx, sy).unwrap_or(fill);
        }
    }

    if out.iter().all(|v| !v.is_finite()) {
        return Err(Error::ResamplingError { index, reason: "all resampled pixels were non-finite".into() });
    }

    let mut metadata = frame.metadata.clone();
    let reference_keys = reference.metadata.wcs_passthrough_keys();
    for key in frame.metadata.wcs_passthrough_keys() {
        if !reference_keys.contains(&key) {
            metadata.remove(&key);
        }
    }
    for key in &reference_keys {
        if let Some(v) = reference.metadata.get_str(key) {
            metadata.set(key.clone(), v.to_string());
        }
    }

    let mut out_frame = Frame::new(frame.kind, width, height, out, metadata);
    out_frame.wcs = Some(reference_wcs.clone());
    out_frame.source_path = frame.source_path.clone();
    Ok(out_frame)
}
