//! `ValidationReport`: a human-facing summary of a loaded frame.

use star_types::Frame;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub width: usize,
    pub height: usize,
    pub mean: f32,
    pub stddev: f32,
    pub min: f32,
    pub max: f32,
    pub has_wcs: bool,
    /// (RA, Dec) arcsec/pixel plate scale, if a WCS is present.
    pub plate_scale_arcsec: Option<(f64, f64)>,
    /// Estimated field center, from the WCS reference pixel if present,
    /// otherwise from ad-hoc `RA`/`DEC` header keys.
    pub field_center: Option<(f64, f64)>,
}

pub fn validate_report(frame: &Frame) -> ValidationReport {
    let (min, max) = frame.min_max();
    let has_wcs = frame.wcs.is_some();
    let plate_scale_arcsec = frame.wcs.as_ref().map(|w| w.pixel_scale_arcsec());
    let field_center = frame
        .wcs
        .as_ref()
        .map(|w| w.pixel_to_world(w.crpix1, w.crpix2))
        .or_else(|| {
            let ra = frame.metadata.get_f64_any(&["RA", "OBJCTRA"]);
            let dec = frame.metadata.get_f64_any(&["DEC", "OBJCTDEC"]);
            ra.zip(dec)
        });

    ValidationReport {
        width: frame.width,
        height: frame.height,
        mean: frame.mean(),
        stddev: frame.stddev(),
        min,
        max,
        has_wcs,
        plate_scale_arcsec,
        field_center,
    }
}
