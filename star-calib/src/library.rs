//! `CalibrationLibrary`: indexes masters on disk, serves matches, builds new ones.

use crate::combine::{combine_with_budget, ReduceOp};
use crate::error::{Error, Result};
use chrono::{NaiveDate, Utc};
use log::warn;
use star_types::{CalibrationManifest, CalibrationMaster, Frame, FrameKind, Sequence};
use std::path::{Path, PathBuf};

/// Matching tolerances for the lookup policy (§4.2). Kept as a small local
/// struct rather than the crate-level `Config` to avoid a dependency cycle;
/// the top-level `starcore::Config` is converted into this at call sites.
#[derive(Debug, Clone, Copy)]
pub struct MatchTolerances {
    pub temp_tolerance: f64,
    pub exposure_tolerance: f64,
}

impl Default for MatchTolerances {
    fn default() -> Self {
        Self { temp_tolerance: 1.0, exposure_tolerance: 0.5 }
    }
}

pub struct CalibrationLibrary {
    path: PathBuf,
    masters: Vec<CalibrationMaster>,
}

fn matches_temp(a: Option<f64>, b: Option<f64>, tolerance: f64) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() <= tolerance,
        _ => false,
    }
}

fn matches_int(a: Option<i64>, b: Option<i64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

impl CalibrationLibrary {
    /// Rebuilds the in-memory index by loading every master file in `path`.
    pub fn open(path: &Path, loader: impl Fn(&Path) -> std::io::Result<CalibrationMaster>) -> Result<Self> {
        let mut masters = Vec::new();
        let entries = std::fs::read_dir(path)
            .map_err(|e| Error::LibraryUnreadable { path: path.to_path_buf(), reason: e.to_string() })?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::LibraryUnreadable { path: path.to_path_buf(), reason: e.to_string() })?;
            let file_path = entry.path();
            if file_path.extension().and_then(|e| e.to_str()) != Some("fits") {
                continue;
            }
            match loader(&file_path) {
                Ok(master) => masters.push(master),
                Err(e) => warn!("skipping unreadable master {}: {e}", file_path.display()),
            }
        }
        Ok(Self { path: path.to_path_buf(), masters })
    }

    /// Constructs an already-populated library, for callers (and tests)
    /// that build masters in memory rather than reading a directory.
    pub fn from_masters(path: &Path, masters: Vec<CalibrationMaster>) -> Self {
        Self { path: path.to_path_buf(), masters }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn masters(&self) -> &[CalibrationMaster] {
        &self.masters
    }

    pub fn insert(&mut self, master: CalibrationMaster) {
        self.masters.push(master);
    }

    pub fn find_bias(&self, frame: &Frame, tol: MatchTolerances) -> Option<&CalibrationMaster> {
        self.masters.iter().find(|m| {
            m.frame.kind == FrameKind::MasterBias
                && matches_int(m.frame.gain(), frame.gain())
                && matches_int(m.frame.offset(), frame.offset())
                && m.frame.binning() == frame.binning()
                && matches_temp(m.frame.ccd_temp(), frame.ccd_temp(), tol.temp_tolerance)
        })
    }

    fn find_dark_exact(&self, frame: &Frame, tol: MatchTolerances) -> Option<&CalibrationMaster> {
        let exposure = frame.exposure_seconds()?;
        self.masters.iter().find(|m| {
            m.frame.kind == FrameKind::MasterDark
                && matches_int(m.frame.gain(), frame.gain())
                && matches_int(m.frame.offset(), frame.offset())
                && m.frame.binning() == frame.binning()
                && matches_temp(m.frame.ccd_temp(), frame.ccd_temp(), tol.temp_tolerance)
                && m.frame.exposure_seconds().map(|e| (e - exposure).abs() <= tol.exposure_tolerance).unwrap_or(false)
        })
    }

    /// The exposure-scaled fallback: any dark whose exposure is at least as
    /// long as the frame's, ties broken by smallest exposure excess.
    fn find_dark_scaled(&self, frame: &Frame, tol: MatchTolerances) -> Option<&CalibrationMaster> {
        let exposure = frame.exposure_seconds()?;
        self.masters
            .iter()
            .filter(|m| {
                m.frame.kind == FrameKind::MasterDark
                    && matches_int(m.frame.gain(), frame.gain())
                    && matches_int(m.frame.offset(), frame.offset())
                    && m.frame.binning() == frame.binning()
                    && matches_temp(m.frame.ccd_temp(), frame.ccd_temp(), tol.temp_tolerance)
                    && m.frame.exposure_seconds().map(|e| e >= exposure).unwrap_or(false)
            })
            .min_by(|a, b| {
                let excess_a = a.frame.exposure_seconds().unwrap_or(f64::INFINITY) - exposure;
                let excess_b = b.frame.exposure_seconds().unwrap_or(f64::INFINITY) - exposure;
                excess_a.partial_cmp(&excess_b).unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Tries the exact-exposure matcher first, then the scaled fallback.
    pub fn find_dark(&self, frame: &Frame, tol: MatchTolerances) -> Option<&CalibrationMaster> {
        self.find_dark_exact(frame, tol).or_else(|| self.find_dark_scaled(frame, tol))
    }

    pub fn find_flat(&self, frame: &Frame, tol: MatchTolerances) -> Option<&CalibrationMaster> {
        self.masters.iter().find(|m| {
            m.frame.kind == FrameKind::MasterFlat
                && m.frame.filter() == frame.filter()
                && m.frame.binning() == frame.binning()
                && matches_temp(m.frame.ccd_temp(), frame.ccd_temp(), tol.temp_tolerance)
        })
    }

    /// Encodes the master filename: `master_<kind>_<exptime?>_<temp>C_<gain>g<offset>o_<date>.fits`.
    pub fn master_filename(master: &CalibrationMaster, date: NaiveDate) -> String {
        let kind = match master.frame.kind {
            FrameKind::MasterBias => "bias",
            FrameKind::MasterDark => "dark",
            FrameKind::MasterFlat => "flat",
            _ => "unknown",
        };
        let exptime_part = master
            .frame
            .exposure_seconds()
            .map(|e| format!("{e}_"))
            .unwrap_or_default();
        let temp = master.frame.ccd_temp().unwrap_or(0.0);
        let gain = master.frame.gain().unwrap_or(0);
        let offset = master.frame.offset().unwrap_or(0);
        format!("master_{kind}_{exptime_part}{temp}C_{gain}g{offset}o_{}.fits", date.format("%Y%m%d"))
    }

    /// Builds one calibration master from a sequence of same-kind inputs.
    ///
    /// `bias`/`dark` masters are consulted to build a "calibrated" dark
    /// (bias-subtracted first) or a flat (bias- and dark-subtracted, scaled
    /// `1/median(input)`, required: [`Error::MissingMaster`] if absent).
    pub fn build_master(
        target_kind: FrameKind,
        sequence: &Sequence,
        sigma_low: f64,
        sigma_high: f64,
        memory_budget: u64,
        bias: Option<&CalibrationMaster>,
        dark: Option<&CalibrationMaster>,
        generated_at: i64,
    ) -> Result<CalibrationMaster> {
        if sequence.is_empty() {
            return Err(Error::EmptySequence { kind: format!("{target_kind:?}") });
        }
        let (width, height) = (sequence.frames[0].width, sequence.frames[0].height);
        let op = ReduceOp::Mean;

        let mut prepared: Vec<Vec<f32>> = Vec::with_capacity(sequence.len());
        for frame in &sequence.frames {
            if (frame.width, frame.height) != (width, height) {
                return Err(Error::ShapeMismatch { expected: (width, height), found: (frame.width, frame.height) });
            }
            let mut data = frame.data.clone();

            if target_kind == FrameKind::MasterDark {
                if let Some(bias) = bias {
                    subtract_in_place(&mut data, &bias.frame.data)?;
                }
            }
            if target_kind == FrameKind::MasterFlat {
                let bias = bias.ok_or_else(|| Error::MissingMaster { kind: "bias".into(), frame: "flat build".into() })?;
                let dark = dark.ok_or_else(|| Error::MissingMaster { kind: "dark".into(), frame: "flat build".into() })?;
                subtract_in_place(&mut data, &bias.frame.data)?;
                subtract_in_place(&mut data, &dark.frame.data)?;
                let inv_median = 1.0 / median_of(&data);
                for v in data.iter_mut() {
                    *v *= inv_median;
                }
            }
            prepared.push(data);
        }

        let (combined, rejected) =
            combine_with_budget(&prepared, width, height, op, true, sigma_low, sigma_high, memory_budget);

        let fingerprint = sequence.frames[0].fingerprint();
        let manifest = CalibrationManifest {
            source_fingerprint: fingerprint,
            input_count: sequence.len(),
            rejected_count: rejected,
            method: "mean+sigma_clip".to_string(),
            generated_at,
        };

        let mut metadata = sequence.frames[0].metadata.clone();
        metadata.set("IMAGETYP", target_kind.header_value());
        metadata.set("FRAME", target_kind.header_value());
        metadata.set("COMBINED", "T");

        let frame = Frame::new(target_kind, width, height, combined, metadata);
        Ok(CalibrationMaster::new(frame, manifest))
    }
}

fn subtract_in_place(data: &mut [f32], other: &[f32]) -> Result<()> {
    if data.len() != other.len() {
        return Err(Error::ShapeMismatch { expected: (0, 0), found: (0, 0) });
    }
    for (a, b) in data.iter_mut().zip(other.iter()) {
        *a -= *b;
    }
    Ok(())
}

fn median_of(data: &[f32]) -> f32 {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 0 {
        return 1.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_types::Metadata;

    fn bias_frame(value: f32) -> Frame {
        let mut meta = Metadata::new();
        meta.set("GAIN", "100");
        meta.set("OFFSET", "50");
        meta.set("CCD-TEMP", "-10.0");
        meta.set("XBINNING", "1");
        meta.set("YBINNING", "1");
        Frame::new(FrameKind::Bias, 512, 512, vec![value; 512 * 512], meta)
    }

    #[test]
    fn bias_master_of_three_identical_frames_equals_the_input() {
        let sequence = Sequence::new(vec![bias_frame(1000.0), bias_frame(1000.0), bias_frame(1000.0)]);
        let master = CalibrationLibrary::build_master(
            FrameKind::MasterBias,
            &sequence,
            4.0,
            3.0,
            2_000_000_000,
            None,
            None,
            0,
        )
        .unwrap();
        assert!(master.frame.data.iter().all(|&v| v == 1000.0));
        assert_eq!(master.frame.metadata.get_str("IMAGETYP"), Some("Master Bias"));
        assert_eq!(master.manifest.input_count, 3);
    }

    #[test]
    fn find_dark_prefers_exact_exposure_over_scaled() {
        let mut exact_meta = Metadata::new();
        exact_meta.set("GAIN", "100");
        exact_meta.set("OFFSET", "50");
        exact_meta.set("CCD-TEMP", "-10.0");
        exact_meta.set("XBINNING", "1");
        exact_meta.set("YBINNING", "1");
        exact_meta.set("EXPTIME", "60.0");
        let exact = Frame::new(FrameKind::MasterDark, 100, 100, vec![200.0; 100 * 100], exact_meta);

        let mut scaled_meta = exact.metadata.clone();
        scaled_meta.set("EXPTIME", "120.0");
        let scaled = Frame::new(FrameKind::MasterDark, 100, 100, vec![200.0; 100 * 100], scaled_meta);

        let manifest = CalibrationManifest {
            source_fingerprint: exact.fingerprint(),
            input_count: 3,
            rejected_count: 0,
            method: "mean".into(),
            generated_at: 0,
        };
        let library = CalibrationLibrary::from_masters(
            Path::new("/masters"),
            vec![
                CalibrationMaster::new(scaled, manifest.clone()),
                CalibrationMaster::new(exact, manifest),
            ],
        );

        let mut light_meta = Metadata::new();
        light_meta.set("GAIN", "100");
        light_meta.set("OFFSET", "50");
        light_meta.set("CCD-TEMP", "-10.0");
        light_meta.set("XBINNING", "1");
        light_meta.set("YBINNING", "1");
        light_meta.set("EXPTIME", "60.0");
        let light = Frame::new(FrameKind::Light, 100, 100, vec![500.0; 100 * 100], light_meta);

        let found = library.find_dark(&light, MatchTolerances::default()).unwrap();
        assert_eq!(found.frame.exposure_seconds(), Some(60.0));
    }

    #[test]
    fn open_skips_unreadable_masters_and_ignores_non_fits_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.fits"), b"stub").unwrap();
        std::fs::write(dir.path().join("corrupt.fits"), b"stub").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        let library = CalibrationLibrary::open(dir.path(), |path| {
            if path.ends_with("corrupt.fits") {
                Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "truncated header"))
            } else {
                Ok(CalibrationMaster::new(
                    bias_frame(1000.0),
                    CalibrationManifest {
                        source_fingerprint: bias_frame(1000.0).fingerprint(),
                        input_count: 1,
                        rejected_count: 0,
                        method: "mean".into(),
                        generated_at: 0,
                    },
                ))
            }
        })
        .unwrap();

        assert_eq!(library.masters().len(), 1);
    }
}
