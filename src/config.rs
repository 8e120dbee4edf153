//! Run configuration
//!
//! Every knob of a calibration run with its default. Loadable from JSON so a
//! run can be reproduced from a checked-in file.

use crate::error::CalibrationError;
use crate::time::BinSize;
use crate::types::{ModelKind, HR_VALID_MAX, HR_VALID_MIN};
use serde::{Deserialize, Serialize};

/// Default minimum seconds of scan data a bin needs to be kept
pub const DEFAULT_MIN_SCAN_COVERAGE_S: f64 = 30.0;

/// Pairs a context needs before it gets its own model
pub const MIN_SAMPLES_PER_CONTEXT: usize = 30;

/// Default number of x bins for binned-median knots
pub const DEFAULT_NUM_BINS: usize = 15;

/// Default physiological output range of a model (bpm)
pub const DEFAULT_CLIP_RANGE: (f64, f64) = (35.0, 220.0);

/// Default minimum number of reference samples backing a pair
pub const MIN_REFERENCE_POINTS: usize = 1;

/// Configuration for a calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Width of the time bins
    pub bin_size: BinSize,
    /// Minimum scan coverage in seconds (capped at the bin width)
    pub min_scan_coverage_s: f64,
    /// Curve family to fit
    pub model_kind: ModelKind,
    /// Pairs a context needs before it gets its own model
    pub min_samples_per_context: usize,
    /// Number of equal-width x bins for piecewise-monotone knots
    pub num_bins: usize,
    pub clip_lo: f64,
    pub clip_hi: f64,
    /// Plausible heart-rate range applied to both devices when pairing
    pub valid_bpm_lo: f64,
    pub valid_bpm_hi: f64,
    pub min_reference_points: usize,
    /// Restrict reference data to this subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            bin_size: BinSize::default(),
            min_scan_coverage_s: DEFAULT_MIN_SCAN_COVERAGE_S,
            model_kind: ModelKind::default(),
            min_samples_per_context: MIN_SAMPLES_PER_CONTEXT,
            num_bins: DEFAULT_NUM_BINS,
            clip_lo: DEFAULT_CLIP_RANGE.0,
            clip_hi: DEFAULT_CLIP_RANGE.1,
            valid_bpm_lo: HR_VALID_MIN,
            valid_bpm_hi: HR_VALID_MAX,
            min_reference_points: MIN_REFERENCE_POINTS,
            user_id: None,
        }
    }
}

impl CalibrationConfig {
    /// Load a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, CalibrationError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, CalibrationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn clip_range(&self) -> (f64, f64) {
        (self.clip_lo, self.clip_hi)
    }

    pub fn valid_range(&self) -> (f64, f64) {
        (self.valid_bpm_lo, self.valid_bpm_hi)
    }

    /// Reject settings that cannot produce a meaningful run
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !self.min_scan_coverage_s.is_finite() || self.min_scan_coverage_s < 0.0 {
            return Err(CalibrationError::InvalidInput(format!(
                "min_scan_coverage_s must be a non-negative number, got {}",
                self.min_scan_coverage_s
            )));
        }
        if self.num_bins == 0 {
            return Err(CalibrationError::InvalidInput(
                "num_bins must be at least 1".to_string(),
            ));
        }
        if !(self.clip_lo <= self.clip_hi) {
            return Err(CalibrationError::InvalidInput(format!(
                "clip range [{}, {}] is inverted",
                self.clip_lo, self.clip_hi
            )));
        }
        if !(self.valid_bpm_lo <= self.valid_bpm_hi) {
            return Err(CalibrationError::InvalidInput(format!(
                "valid bpm range [{}, {}] is inverted",
                self.valid_bpm_lo, self.valid_bpm_hi
            )));
        }
        Ok(())
    }
}
