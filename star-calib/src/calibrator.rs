//! `Calibrator`: applies bias/dark/flat correction to a single light frame.

use crate::error::{Error, Result};
use crate::library::{CalibrationLibrary, MatchTolerances};
use star_types::{CalibrationMaster, Frame};

/// Which of the three calibration steps to apply; all default on.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationSteps {
    pub bias: bool,
    pub dark: bool,
    pub flat: bool,
}

impl Default for CalibrationSteps {
    fn default() -> Self {
        Self { bias: true, dark: true, flat: true }
    }
}

/// Masters to use directly, bypassing library lookup, for any subset of steps.
#[derive(Debug, Clone, Default)]
pub struct CalibrationOverrides<'a> {
    pub bias: Option<&'a CalibrationMaster>,
    pub dark: Option<&'a CalibrationMaster>,
    pub flat: Option<&'a CalibrationMaster>,
}

/// Flat values below this are clamped before division, to avoid blowing up
/// vignetted or dead-pixel regions near zero.
const FLAT_EPSILON: f32 = 1e-4;

fn shape_of(master: &CalibrationMaster) -> (usize, usize) {
    (master.frame.width, master.frame.height)
}

/// Applies `steps` to `frame`, consulting `library` for any step not
/// satisfied by `overrides`. Returns a new `Frame`; never mutates `frame`.
///
/// A missing master for a selected step is a soft failure: the step is
/// skipped and an annotation (`CALIB_SKIPPED_<STEP>`) is recorded in the
/// output's metadata. A shape mismatch between frame and master is a hard
/// failure.
pub fn calibrate(
    frame: &Frame,
    steps: CalibrationSteps,
    overrides: CalibrationOverrides,
    library: &CalibrationLibrary,
    tol: MatchTolerances,
) -> Result<Frame> {
    let mut data = frame.data.clone();
    let mut metadata = frame.metadata.clone();
    let shape = (frame.width, frame.height);

    if steps.bias {
        let bias = overrides.bias.or_else(|| library.find_bias(frame, tol));
        match bias {
            Some(bias) => {
                check_shape(shape, shape_of(bias))?;
                for (a, b) in data.iter_mut().zip(bias.frame.data.iter()) {
                    *a -= *b;
                }
            }
            None => {
                metadata.set("CALIB_SKIPPED_BIAS", "T");
            }
        }
    }

    if steps.dark {
        let dark = overrides.dark.or_else(|| library.find_dark(frame, tol));
        match dark {
            Some(dark) => {
                check_shape(shape, shape_of(dark))?;
                let frame_exposure = frame.exposure_seconds().unwrap_or(0.0);
                let dark_exposure = dark.frame.exposure_seconds().unwrap_or(frame_exposure);
                let is_exact = (dark_exposure - frame_exposure).abs() <= tol.exposure_tolerance;
                let scale = if is_exact { 1.0 } else { (frame_exposure / dark_exposure) as f32 };
                for (a, b) in data.iter_mut().zip(dark.frame.data.iter()) {
                    *a -= scale * *b;
                }
            }
            None => {
                metadata.set("CALIB_SKIPPED_DARK", "T");
            }
        }
    }

    if steps.flat {
        let flat = overrides.flat.or_else(|| library.find_flat(frame, tol));
        match flat {
            Some(flat) => {
                check_shape(shape, shape_of(flat))?;
                for (a, b) in data.iter_mut().zip(flat.frame.data.iter()) {
                    let divisor = if b.abs() < FLAT_EPSILON { FLAT_EPSILON } else { *b };
                    *a /= divisor;
                }
            }
            None => {
                metadata.set("CALIB_SKIPPED_FLAT", "T");
            }
        }
    }

    let mut out = Frame::new(frame.kind, frame.width, frame.height, data, metadata);
    out.wcs = frame.wcs.clone();
    out.source_path = frame.source_path.clone();
    Ok(out)
}

fn check_shape(expected: (usize, usize), found: (usize, usize)) -> Result<()> {
    if expected != found {
        return Err(Error::ShapeMismatch { expected, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_types::{CalibrationManifest, Fingerprint, FrameKind, Metadata};

    fn uniform_master(kind: FrameKind, value: f32, exptime: Option<&str>) -> CalibrationMaster {
        let mut meta = Metadata::new();
        if let Some(e) = exptime {
            meta.set("EXPTIME", e);
        }
        let frame = Frame::new(kind, 10, 10, vec![value; 100], meta);
        let manifest = CalibrationManifest {
            source_fingerprint: Fingerprint {
                kind: "Dark".into(),
                binning: (1, 1),
                gain: 0,
                offset: 0,
                filter: None,
                exposure_ms: 0,
                temperature_decic: 0,
                width: 10,
                height: 10,
            },
            input_count: 1,
            rejected_count: 0,
            method: "mean".into(),
            generated_at: 0,
        };
        CalibrationMaster::new(frame, manifest)
    }

    #[test]
    fn exposure_scaled_dark_subtraction_matches_the_worked_example() {
        let mut light_meta = Metadata::new();
        light_meta.set("EXPTIME", "60.0");
        let light = Frame::new(FrameKind::Light, 10, 10, vec![500.0; 100], light_meta);

        let bias = uniform_master(FrameKind::MasterBias, 100.0, None);
        let dark = uniform_master(FrameKind::MasterDark, 200.0, Some("120.0"));

        let library = CalibrationLibrary::from_masters(std::path::Path::new("/masters"), vec![]);
        let overrides = CalibrationOverrides { bias: Some(&bias), dark: Some(&dark), flat: None };
        let steps = CalibrationSteps { bias: true, dark: true, flat: false };

        let out = calibrate(&light, steps, overrides, &library, MatchTolerances::default()).unwrap();
        assert!(out.data.iter().all(|&v| (v - 300.0).abs() < 1e-4));
    }

    #[test]
    fn missing_master_is_a_soft_failure() {
        let light = Frame::new(FrameKind::Light, 10, 10, vec![500.0; 100], Metadata::new());
        let library = CalibrationLibrary::from_masters(std::path::Path::new("/masters"), vec![]);
        let steps = CalibrationSteps { bias: true, dark: false, flat: false };
        let out = calibrate(&light, steps, CalibrationOverrides::default(), &library, MatchTolerances::default()).unwrap();
        assert_eq!(out.metadata.get_str("CALIB_SKIPPED_BIAS"), Some("T"));
        assert_eq!(out.data, light.data);
    }

    #[test]
    fn shape_mismatch_is_a_hard_failure() {
        let light = Frame::new(FrameKind::Light, 10, 10, vec![500.0; 100], Metadata::new());
        let bias = uniform_master(FrameKind::MasterBias, 100.0, None);
        let mut wrong_shape_bias = bias.clone();
        wrong_shape_bias.frame.width = 5;
        wrong_shape_bias.frame.height = 5;
        wrong_shape_bias.frame.data = vec![100.0; 25];
        let library = CalibrationLibrary::from_masters(std::path::Path::new("/masters"), vec![]);
        let overrides = CalibrationOverrides { bias: Some(&wrong_shape_bias), dark: None, flat: None };
        let steps = CalibrationSteps { bias: true, dark: false, flat: false };
        let err = calibrate(&light, steps, overrides, &library, MatchTolerances::default()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }
}
