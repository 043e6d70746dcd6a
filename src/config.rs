//! Process-wide configuration, loaded once and treated as immutable thereafter.
//!
//! Mirrors the module-level constants of the Python implementation this core
//! was distilled from, but as an explicit threaded value rather than globals.

use serde::{Deserialize, Serialize};
use star_align::{AlignConfig, AlignMethod};
use star_calib::MatchTolerances;
use star_calib::ReduceOp;
use star_stack::StackConfig;

/// One entry of the sequence-consistency check: a header key and the
/// tolerance within which its values must agree across a [`star_types::Sequence`].
/// `tolerance == 0.0` means an exact match is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestedCard {
    pub name: String,
    pub tolerance: f64,
}

impl TestedCard {
    pub fn new(name: impl Into<String>, tolerance: f64) -> Self {
        Self { name: name.into(), tolerance }
    }
}

/// Immutable configuration block threaded into every component constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub calibration_path: String,
    pub data_path: String,
    pub observatory_code: String,

    pub temp_tolerance: f64,
    pub exposure_tolerance: f64,

    pub sigma_low: f64,
    pub sigma_high: f64,

    pub integration_memory_limit: u64,
    pub integration_chunk_size: usize,

    pub alignment_memory_limit: u64,
    pub alignment_chunk_size: usize,
    pub alignment_enable_chunked: bool,
    pub alignment_default_method: String,
    pub alignment_fallback_method: String,

    pub max_alignment_images: usize,
    pub max_integration_images: usize,

    pub motion_tracking_sigma_clip: bool,
    pub motion_tracking_method: String,

    pub solver_offline_timeout: u64,
    pub solver_online_timeout: u64,

    pub tested_fits_cards: Vec<TestedCard>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            calibration_path: String::new(),
            data_path: String::new(),
            observatory_code: String::new(),

            temp_tolerance: 1.0,
            exposure_tolerance: 0.5,

            sigma_low: 4.0,
            sigma_high: 3.0,

            integration_memory_limit: 2_000_000_000,
            integration_chunk_size: 10,

            // Not present in the retrieved original_source/config.py (align.py
            // imports these names but the file as captured doesn't define
            // them); mirrored from the integration defaults above.
            alignment_memory_limit: 2_000_000_000,
            alignment_chunk_size: 10,
            alignment_enable_chunked: true,
            alignment_default_method: "reprojection".to_string(),
            alignment_fallback_method: "asterism".to_string(),

            max_alignment_images: 200,
            max_integration_images: 500,

            motion_tracking_sigma_clip: true,
            motion_tracking_method: "average".to_string(),

            solver_offline_timeout: 30,
            solver_online_timeout: 300,

            tested_fits_cards: vec![
                TestedCard::new("GAIN", 0.0),
                TestedCard::new("OFFSET", 0.0),
                TestedCard::new("XBINNING", 0.0),
                TestedCard::new("EXPTIME", 1.0),
                TestedCard::new("FILTER", 0.0),
                TestedCard::new("CCD-TEMP", 2.0),
                TestedCard::new("NAXIS1", 0.0),
                TestedCard::new("NAXIS2", 0.0),
            ],
        }
    }
}

/// Builder for [`Config`], for callers that only want to override a few fields.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self { config: Config::default() }
    }

    pub fn calibration_path(mut self, path: impl Into<String>) -> Self {
        self.config.calibration_path = path.into();
        self
    }

    pub fn data_path(mut self, path: impl Into<String>) -> Self {
        self.config.data_path = path.into();
        self
    }

    pub fn sigma_thresholds(mut self, low: f64, high: f64) -> Self {
        self.config.sigma_low = low;
        self.config.sigma_high = high;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl From<&Config> for MatchTolerances {
    fn from(config: &Config) -> Self {
        Self { temp_tolerance: config.temp_tolerance, exposure_tolerance: config.exposure_tolerance }
    }
}

fn parse_align_method(name: &str) -> AlignMethod {
    match name {
        "asterism" => AlignMethod::Asterism,
        _ => AlignMethod::Reprojection,
    }
}

impl From<&Config> for AlignConfig {
    fn from(config: &Config) -> Self {
        Self {
            method: parse_align_method(&config.alignment_default_method),
            chunk_size: config.alignment_chunk_size,
            enable_chunked: config.alignment_enable_chunked,
            memory_budget: config.alignment_memory_limit,
            ..AlignConfig::default()
        }
    }
}

fn parse_reduce_op(name: &str) -> ReduceOp {
    match name {
        "median" => ReduceOp::Median,
        "sum" => ReduceOp::Sum,
        _ => ReduceOp::Mean,
    }
}

impl<'a> From<&Config> for StackConfig<'a> {
    fn from(config: &Config) -> Self {
        Self {
            op: parse_reduce_op(&config.motion_tracking_method),
            sigma_clip: config.motion_tracking_sigma_clip,
            sigma_low: config.sigma_low,
            sigma_high: config.sigma_high,
            scale_fn: None,
            memory_limit: config.integration_memory_limit,
            chunk_size: config.integration_chunk_size,
            max_images: config.max_integration_images,
            ..StackConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.sigma_low, 4.0);
        assert_eq!(config.sigma_high, 3.0);
        assert_eq!(config.temp_tolerance, 1.0);
        assert_eq!(config.exposure_tolerance, 0.5);
        assert_eq!(config.integration_chunk_size, 10);
    }

    #[test]
    fn builder_overrides_only_requested_fields() {
        let config = ConfigBuilder::new()
            .calibration_path("/masters")
            .sigma_thresholds(3.0, 2.5)
            .build();
        assert_eq!(config.calibration_path, "/masters");
        assert_eq!(config.sigma_low, 3.0);
        assert_eq!(config.sigma_high, 2.5);
        assert_eq!(config.integration_chunk_size, 10);
    }

    #[test]
    fn match_tolerances_mirror_the_config_fields() {
        let config = ConfigBuilder::new().build();
        let tolerances = MatchTolerances::from(&config);
        assert_eq!(tolerances.temp_tolerance, config.temp_tolerance);
        assert_eq!(tolerances.exposure_tolerance, config.exposure_tolerance);
    }

    #[test]
    fn align_config_parses_the_configured_method_and_budget() {
        let mut config = Config::default();
        config.alignment_default_method = "asterism".to_string();
        config.alignment_chunk_size = 7;
        let align_config = AlignConfig::from(&config);
        assert_eq!(align_config.method, AlignMethod::Asterism);
        assert_eq!(align_config.chunk_size, 7);
        assert_eq!(align_config.memory_budget, config.alignment_memory_limit);
        assert_eq!(align_config.max_sources, AlignConfig::default().max_sources);
    }

    #[test]
    fn align_config_defaults_an_unrecognized_method_to_reprojection() {
        let mut config = Config::default();
        config.alignment_default_method = "plate-solve".to_string();
        assert_eq!(AlignConfig::from(&config).method, AlignMethod::Reprojection);
    }

    #[test]
    fn stack_config_parses_the_configured_reduce_op() {
        let mut config = Config::default();
        config.motion_tracking_method = "median".to_string();
        let stack_config = StackConfig::from(&config);
        assert_eq!(stack_config.op, ReduceOp::Median);
        assert_eq!(stack_config.sigma_low, config.sigma_low);
        assert_eq!(stack_config.memory_limit, config.integration_memory_limit);
        assert!(stack_config.scale_fn.is_none());
    }
}
