//! Container (FITS) loading and saving.
//!
//! An 80-column-header-plus-binary-data-unit container is read into a
//! [`star_types::Frame`]: pixels are always converted to `f32` regardless of
//! the on-disk bit depth, and the header is flattened into a
//! [`star_types::Metadata`] map. Saving is the inverse: a `Frame`'s pixels
//! and metadata are written back out, with the pipeline's own additional
//! keys (`COMBINED`, `MOTION_TRACKED`, ...) included verbatim.

use fitsio::hdu::HduInfo;
use fitsio::FitsFile;
use log::warn;
use std::path::Path;
use star_types::{Error, Frame, FrameKind, Metadata, Wcs};

/// The header keys this pipeline reads by name, beyond the ones `fitsio`
/// exposes structurally (`NAXIS1`/`NAXIS2`/`BITPIX`).
const KNOWN_STRING_KEYS: &[&str] = &[
    "DATE-OBS", "FILTER", "OBJECT", "FRAME", "IMAGETYP", "CTYPE1", "CTYPE2", "CUNIT1", "CUNIT2",
];

const KNOWN_NUMERIC_KEYS: &[&str] = &[
    "EXPTIME", "GAIN", "OFFSET", "CCD-TEMP", "XBINNING", "YBINNING", "CRPIX1", "CRPIX2", "CRVAL1",
    "CRVAL2", "CD1_1", "CD1_2", "CD2_1", "CD2_2", "PC1_1", "PC1_2", "PC2_1", "PC2_2", "CDELT1",
    "CDELT2", "LONPOLE", "LATPOLE",
];

fn error_path(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::BadContainer { path: path.to_path_buf(), reason: reason.to_string() }
}

/// Loads a container file into a validated `Frame`.
///
/// Fails with [`Error::BadContainer`] (unreadable), [`Error::WrongDimensionality`]
/// (not 2D), [`Error::TooSmall`] (either axis below 100 px), [`Error::NoContrast`]
/// (flat frame) or [`Error::TooDark`] (mean and peak both implausibly low).
pub fn load(path: &Path) -> Result<Frame, Error> {
    let mut file = FitsFile::open(path).map_err(|e| error_path(path, e))?;
    let hdu = file.primary_hdu().map_err(|e| error_path(path, e))?;

    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        _ => return Err(error_path(path, "primary HDU is not an image")),
    };
    if shape.len() != 2 {
        return Err(Error::WrongDimensionality { path: path.to_path_buf(), naxis: shape.len() });
    }
    let height = shape[0];
    let width = shape[1];

    let data: Vec<f32> = hdu.read_image(&mut file).map_err(|e| error_path(path, e))?;

    let mut metadata = Metadata::new();
    for key in KNOWN_STRING_KEYS {
        if let Ok(value) = hdu.read_key::<String>(&mut file, key) {
            metadata.set(*key, value);
        }
    }
    for key in KNOWN_NUMERIC_KEYS {
        if let Ok(value) = hdu.read_key::<f64>(&mut file, key) {
            metadata.set(*key, value.to_string());
        }
    }
    metadata.set("NAXIS1", width.to_string());
    metadata.set("NAXIS2", height.to_string());

    let kind = metadata
        .get_str_any(&["FRAME", "IMAGETYP"])
        .and_then(FrameKind::from_header_value)
        .unwrap_or(FrameKind::Light);

    let wcs = build_wcs(&metadata);
    if wcs.is_none() && metadata.contains("CTYPE1") {
        warn!("{}: CTYPE1 present but WCS keys incomplete, loading without a WCS", path.display());
    }

    let frame = Frame::new(kind, width, height, data, metadata).with_source_path(path.to_string_lossy());
    let frame = if let Some(wcs) = wcs { frame.with_wcs(wcs) } else { frame };

    validate(&frame, path)?;
    Ok(frame)
}

fn build_wcs(metadata: &Metadata) -> Option<Wcs> {
    let ctype1 = metadata.get_str("CTYPE1")?.to_string();
    let ctype2 = metadata.get_str("CTYPE2")?.to_string();
    let crpix1 = metadata.get_f64("CRPIX1")?;
    let crpix2 = metadata.get_f64("CRPIX2")?;
    let crval1 = metadata.get_f64("CRVAL1")?;
    let crval2 = metadata.get_f64("CRVAL2")?;

    let (cd1_1, cd1_2, cd2_1, cd2_2) =
        if let (Some(a), Some(b), Some(c), Some(d)) =
            (metadata.get_f64("CD1_1"), metadata.get_f64("CD1_2"), metadata.get_f64("CD2_1"), metadata.get_f64("CD2_2"))
        {
            (a, b, c, d)
        } else {
            // PC + CDELT product form: cd = pc * diag(cdelt).
            let pc1_1 = metadata.get_f64("PC1_1").unwrap_or(1.0);
            let pc1_2 = metadata.get_f64("PC1_2").unwrap_or(0.0);
            let pc2_1 = metadata.get_f64("PC2_1").unwrap_or(0.0);
            let pc2_2 = metadata.get_f64("PC2_2").unwrap_or(1.0);
            let cdelt1 = metadata.get_f64("CDELT1")?;
            let cdelt2 = metadata.get_f64("CDELT2")?;
            (pc1_1 * cdelt1, pc1_2 * cdelt2, pc2_1 * cdelt1, pc2_2 * cdelt2)
        };

    Some(Wcs { ctype1, ctype2, crpix1, crpix2, crval1, crval2, cd1_1, cd1_2, cd2_1, cd2_2 })
}

/// Checks a loaded frame against the size/contrast/brightness floor every
/// light frame entering the pipeline must clear.
pub fn validate(frame: &Frame, path: &Path) -> Result<(), Error> {
    if frame.width < 100 || frame.height < 100 {
        return Err(Error::TooSmall { path: path.to_path_buf(), width: frame.width, height: frame.height });
    }
    let (min, max) = frame.min_max();
    let stddev = frame.stddev();
    if min == max || stddev < 1.0 {
        return Err(Error::NoContrast { path: path.to_path_buf(), stddev });
    }
    let mean = frame.mean();
    if mean < 10.0 && max < 50.0 {
        return Err(Error::TooDark { path: path.to_path_buf(), mean, max });
    }
    Ok(())
}

/// Writes a frame back out, preserving every header key it carries
/// (including the pipeline's own `COMBINED`/`MOTION_TRACKED`/... keys).
pub fn save(path: &Path, frame: &Frame) -> Result<(), Error> {
    use fitsio::images::{ImageDescription, ImageType};

    let description = ImageDescription { data_type: ImageType::Float, dimensions: &[frame.height, frame.width] };
    let mut file = FitsFile::create(path).open().map_err(|e| error_path(path, e))?;
    let hdu = file.create_image("PRIMARY".to_string(), &description).map_err(|e| error_path(path, e))?;
    hdu.write_image(&mut file, &frame.data).map_err(|e| error_path(path, e))?;

    hdu.write_key(&mut file, "FRAME", frame.kind.header_value()).map_err(|e| error_path(path, e))?;
    hdu.write_key(&mut file, "IMAGETYP", frame.kind.header_value()).map_err(|e| error_path(path, e))?;

    for key in frame.metadata.keys() {
        if key == "NAXIS1" || key == "NAXIS2" || key == "FRAME" || key == "IMAGETYP" {
            continue;
        }
        if let Some(v) = frame.metadata.get_f64(key) {
            let _ = hdu.write_key(&mut file, key, v);
        } else if let Some(v) = frame.metadata.get_str(key) {
            let _ = hdu.write_key(&mut file, key, v);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn validate_rejects_frames_below_minimum_dimensions() {
        let meta = Metadata::from_map(BTreeMap::new());
        let frame = Frame::new(FrameKind::Light, 50, 50, vec![100.0; 50 * 50], meta);
        let err = validate(&frame, Path::new("tiny.fits")).unwrap_err();
        assert!(matches!(err, Error::TooSmall { .. }));
    }

    #[test]
    fn validate_rejects_flat_field_as_no_contrast() {
        let meta = Metadata::from_map(BTreeMap::new());
        let frame = Frame::new(FrameKind::Light, 120, 120, vec![500.0; 120 * 120], meta);
        let err = validate(&frame, Path::new("flat.fits")).unwrap_err();
        assert!(matches!(err, Error::NoContrast { .. }));
    }

    #[test]
    fn validate_rejects_too_dark_frames() {
        let meta = Metadata::from_map(BTreeMap::new());
        let mut data = vec![1.0_f32; 120 * 120];
        data[0] = 5.0;
        let frame = Frame::new(FrameKind::Light, 120, 120, data, meta);
        let err = validate(&frame, Path::new("dark.fits")).unwrap_err();
        assert!(matches!(err, Error::TooDark { .. }));
    }

    #[test]
    fn validate_accepts_a_reasonable_light_frame() {
        let meta = Metadata::from_map(BTreeMap::new());
        let mut data = vec![100.0_f32; 120 * 120];
        for (i, v) in data.iter_mut().enumerate() {
            *v += (i % 17) as f32;
        }
        let frame = Frame::new(FrameKind::Light, 120, 120, data, meta);
        assert!(validate(&frame, Path::new("ok.fits")).is_ok());
    }

    #[test]
    fn save_then_load_round_trips_pixels_and_header_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.fits");

        let mut meta = Metadata::from_map(BTreeMap::new());
        meta.set("FILTER", "Luminance");
        meta.set("EXPTIME", "30.0");
        let mut data = vec![200.0_f32; 120 * 120];
        for (i, v) in data.iter_mut().enumerate() {
            *v += (i % 23) as f32;
        }
        let original = Frame::new(FrameKind::Light, 120, 120, data, meta);

        save(&path, &original).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.width, original.width);
        assert_eq!(loaded.height, original.height);
        assert_eq!(loaded.data, original.data);
        assert_eq!(loaded.metadata.get_str("FILTER"), Some("Luminance"));
        assert_eq!(loaded.metadata.get_f64("EXPTIME"), Some(30.0));
        assert_eq!(loaded.kind, FrameKind::Light);
    }
}
