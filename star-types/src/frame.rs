//! The core `Frame` data model: a single exposure's pixels, header and WCS.

use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};

/// What role a frame plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Light,
    Bias,
    Dark,
    Flat,
    MasterBias,
    MasterDark,
    MasterFlat,
}

impl FrameKind {
    /// The `IMAGETYP`/`FRAME` header value this kind is written and read as.
    pub fn header_value(&self) -> &'static str {
        match self {
            FrameKind::Light => "Light",
            FrameKind::Bias => "Bias",
            FrameKind::Dark => "Dark",
            FrameKind::Flat => "Flat",
            FrameKind::MasterBias => "Master Bias",
            FrameKind::MasterDark => "Master Dark",
            FrameKind::MasterFlat => "Master Flat",
        }
    }

    pub fn from_header_value(value: &str) -> Option<Self> {
        match value.trim() {
            "Light" => Some(FrameKind::Light),
            "Bias" => Some(FrameKind::Bias),
            "Dark" => Some(FrameKind::Dark),
            "Flat" => Some(FrameKind::Flat),
            "Master Bias" | "MasterBias" => Some(FrameKind::MasterBias),
            "Master Dark" | "MasterDark" => Some(FrameKind::MasterDark),
            "Master Flat" | "MasterFlat" => Some(FrameKind::MasterFlat),
            _ => None,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, FrameKind::MasterBias | FrameKind::MasterDark | FrameKind::MasterFlat)
    }
}

/// A minimal world-coordinate-system descriptor: enough to reproject and to
/// round-trip pixel <-> world coordinates for the tangent-plane case this
/// pipeline targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wcs {
    pub ctype1: String,
    pub ctype2: String,
    pub crpix1: f64,
    pub crpix2: f64,
    pub crval1: f64,
    pub crval2: f64,
    /// Linear transform matrix, CD convention (PC+CDELT is normalized into
    /// this form on load: `cd = pc * diag(cdelt)`).
    pub cd1_1: f64,
    pub cd1_2: f64,
    pub cd2_1: f64,
    pub cd2_2: f64,
}

impl Wcs {
    pub fn is_celestial(&self) -> bool {
        self.ctype1.starts_with("RA-") || self.ctype1.starts_with("GLON")
    }

    /// Pixel scale along each axis, arcsec/pixel, from the diagonal of the
    /// linear transform matrix (degrees/pixel converted to arcsec).
    pub fn pixel_scale_arcsec(&self) -> (f64, f64) {
        (self.cd1_1.abs() * 3600.0, self.cd2_2.abs() * 3600.0)
    }

    /// Projects a world coordinate to pixel coordinates under the tangent
    /// (gnomonic) approximation, adequate for the small fields this
    /// pipeline's frames cover.
    pub fn world_to_pixel(&self, ra_deg: f64, dec_deg: f64) -> (f64, f64) {
        let dec0 = self.crval2.to_radians();
        let dra = (ra_deg - self.crval1).to_radians() * dec0.cos();
        let ddec = (dec_deg - self.crval2).to_radians();
        let dra_deg = dra.to_degrees();
        let ddec_deg = ddec.to_degrees();

        let det = self.cd1_1 * self.cd2_2 - self.cd1_2 * self.cd2_1;
        let inv11 = self.cd2_2 / det;
        let inv12 = -self.cd1_2 / det;
        let inv21 = -self.cd2_1 / det;
        let inv22 = self.cd1_1 / det;

        let dx = inv11 * dra_deg + inv12 * ddec_deg;
        let dy = inv21 * dra_deg + inv22 * ddec_deg;
        (self.crpix1 + dx, self.crpix2 + dy)
    }

    pub fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.crpix1;
        let dy = y - self.crpix2;
        let dra_deg = self.cd1_1 * dx + self.cd1_2 * dy;
        let ddec_deg = self.cd2_1 * dx + self.cd2_2 * dy;
        let dec0 = self.crval2.to_radians();
        let ra = self.crval1 + dra_deg.to_radians().to_degrees() / dec0.cos().max(1e-12);
        let dec = self.crval2 + ddec_deg;
        (ra, dec)
    }
}

/// A derivable identity for grouping frames that should be treated as the
/// same acquisition configuration, independent of which exposure it is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub kind: String,
    pub binning: (i64, i64),
    pub gain: i64,
    pub offset: i64,
    pub filter: Option<String>,
    /// Exposure time in milliseconds, to keep the fingerprint hashable.
    pub exposure_ms: i64,
    /// Sensor temperature in deci-degrees Celsius, to keep it hashable.
    pub temperature_decic: i64,
    pub width: usize,
    pub height: usize,
}

/// A single exposure: pixels, header and (if present) WCS.
///
/// Created by the frame loader, never mutated in place; calibration and
/// alignment always return a new `Frame`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub kind: FrameKind,
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
    pub metadata: Metadata,
    pub wcs: Option<Wcs>,
    /// Source path, if this frame was loaded from disk.
    pub source_path: Option<String>,
}

impl Frame {
    pub fn new(kind: FrameKind, width: usize, height: usize, data: Vec<f32>, metadata: Metadata) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self { kind, width, height, data, metadata, wcs: None, source_path: None }
    }

    pub fn with_wcs(mut self, wcs: Wcs) -> Self {
        self.wcs = Some(wcs);
        self
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    pub fn stddev(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.data.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / self.data.len() as f32;
        variance.sqrt()
    }

    pub fn min_max(&self) -> (f32, f32) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in &self.data {
            if v < min {
                min = v;
            }
            if v > max {
                max = v;
            }
        }
        (min, max)
    }

    /// Minimum *finite* sample value, used to fill newly exposed pixels when
    /// a frame is shifted for motion tracking.
    pub fn min_finite(&self) -> f32 {
        self.data.iter().copied().filter(|v| v.is_finite()).fold(f32::INFINITY, f32::min)
    }

    pub fn exposure_seconds(&self) -> Option<f64> {
        self.metadata.get_f64("EXPTIME")
    }

    pub fn gain(&self) -> Option<i64> {
        self.metadata.get_i64("GAIN")
    }

    pub fn offset(&self) -> Option<i64> {
        self.metadata.get_i64("OFFSET")
    }

    pub fn ccd_temp(&self) -> Option<f64> {
        self.metadata.get_f64("CCD-TEMP")
    }

    pub fn binning(&self) -> (i64, i64) {
        (
            self.metadata.get_i64("XBINNING").unwrap_or(1),
            self.metadata.get_i64("YBINNING").unwrap_or(1),
        )
    }

    pub fn filter(&self) -> Option<String> {
        self.metadata.get_str("FILTER").map(str::to_string)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let (xbin, ybin) = self.binning();
        Fingerprint {
            kind: self.kind.header_value().to_string(),
            binning: (xbin, ybin),
            gain: self.gain().unwrap_or(0),
            offset: self.offset().unwrap_or(0),
            filter: self.filter(),
            exposure_ms: (self.exposure_seconds().unwrap_or(0.0) * 1000.0).round() as i64,
            temperature_decic: (self.ccd_temp().unwrap_or(0.0) * 10.0).round() as i64,
            width: self.width,
            height: self.height,
        }
    }
}

/// How a calibration master was built: enough provenance to answer "how many
/// inputs, what method, when".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationManifest {
    pub source_fingerprint: Fingerprint,
    pub input_count: usize,
    pub rejected_count: usize,
    pub method: String,
    /// Unix timestamp of generation, supplied by the caller (this crate
    /// never reads the system clock itself).
    pub generated_at: i64,
}

/// A `Frame` whose kind is one of the `Master*` variants, plus its
/// creation manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationMaster {
    pub frame: Frame,
    pub manifest: CalibrationManifest,
}

impl CalibrationMaster {
    pub fn new(frame: Frame, manifest: CalibrationManifest) -> Self {
        debug_assert!(frame.kind.is_master());
        Self { frame, manifest }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: usize, height: usize, value: f32) -> Frame {
        let mut meta = Metadata::new();
        meta.set("GAIN", "100");
        meta.set("OFFSET", "50");
        meta.set("CCD-TEMP", "-10.0");
        meta.set("XBINNING", "1");
        meta.set("YBINNING", "1");
        Frame::new(FrameKind::Light, width, height, vec![value; width * height], meta)
    }

    #[test]
    fn mean_and_stddev_of_uniform_frame() {
        let f = frame(4, 4, 1000.0);
        assert_eq!(f.mean(), 1000.0);
        assert_eq!(f.stddev(), 0.0);
    }

    #[test]
    fn fingerprint_ignores_pixel_values() {
        let a = frame(4, 4, 1000.0);
        let b = frame(4, 4, 2000.0);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn wcs_world_to_pixel_round_trips_through_pixel_to_world() {
        let wcs = Wcs {
            ctype1: "RA---TAN".into(),
            ctype2: "DEC--TAN".into(),
            crpix1: 512.0,
            crpix2: 512.0,
            crval1: 10.0,
            crval2: 20.0,
            cd1_1: -1.0 / 3600.0,
            cd1_2: 0.0,
            cd2_1: 0.0,
            cd2_2: 1.0 / 3600.0,
        };
        let (x, y) = wcs.world_to_pixel(10.01, 20.01);
        let (ra, dec) = wcs.pixel_to_world(x, y);
        assert!((ra - 10.01).abs() < 1e-6);
        assert!((dec - 20.01).abs() < 1e-6);
    }
}
