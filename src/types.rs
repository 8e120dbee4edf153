//! Core types for the calibration pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw scan records, resampled bins, reference aggregates, context
//! intervals, paired records, calibration models and metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CalibrationError;

/// Lowest physiologically plausible heart rate accepted as a pair (bpm)
pub const HR_VALID_MIN: f64 = 30.0;
/// Highest physiologically plausible heart rate accepted as a pair (bpm)
pub const HR_VALID_MAX: f64 = 230.0;

/// One scan-device row: a start instant followed by back-to-back segments.
///
/// `durations[i]` seconds of data at `values[i]` bpm. Entries may be missing
/// in the source data, hence the `Option`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub start: DateTime<Utc>,
    pub durations: Vec<Option<f64>>,
    pub values: Vec<Option<f64>>,
}

impl ScanRecord {
    /// A record holding a single segment
    pub fn single(start: DateTime<Utc>, duration_s: f64, value: f64) -> Self {
        Self {
            start,
            durations: vec![Some(duration_s)],
            values: vec![Some(value)],
        }
    }
}

/// Scan data resampled onto one time bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampledPoint {
    pub window_start: DateTime<Utc>,
    /// Coverage-weighted mean of the segment values (None when uncovered)
    pub scan_bpm: Option<f64>,
    /// Seconds of scan data overlapping the bin
    pub coverage_s: f64,
}

/// A single reference-device heart-rate sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSample {
    pub time: DateTime<Utc>,
    pub heart_rate: f64,
}

/// Reference samples aggregated onto one time bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAggregate {
    pub window_start: DateTime<Utc>,
    pub reference_bpm: f64,
    pub point_count: usize,
}

/// A sleep record with its status ordinal (0 means awake/none)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: u32,
}

/// An activity (sport) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<i64>,
}

/// Context labels attached to a bin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinContext {
    pub sleep_status: u32,
    pub is_active: bool,
}

/// A time bin covered by both devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedRecord {
    pub window_start: DateTime<Utc>,
    pub scan_bpm: f64,
    pub reference_bpm: f64,
    pub reference_points: usize,
    pub coverage_s: f64,
    pub sleep_status: u32,
    pub is_active: bool,
    pub hour: u32,
    pub day_of_week: u32,
}

/// A paired record with its calibrated prediction, ready for export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedRecord {
    pub window_start: DateTime<Utc>,
    pub scan_bpm: f64,
    pub reference_bpm: f64,
    pub reference_points: usize,
    pub coverage_s: f64,
    pub sleep_status: u32,
    pub is_active: bool,
    pub hour: u32,
    pub day_of_week: u32,
    pub predicted_bpm: f64,
    pub context: Context,
}

impl CalibratedRecord {
    pub fn from_pair(pair: &PairedRecord, predicted_bpm: f64, context: Context) -> Self {
        Self {
            window_start: pair.window_start,
            scan_bpm: pair.scan_bpm,
            reference_bpm: pair.reference_bpm,
            reference_points: pair.reference_points,
            coverage_s: pair.coverage_s,
            sleep_status: pair.sleep_status,
            is_active: pair.is_active,
            hour: pair.hour,
            day_of_week: pair.day_of_week,
            predicted_bpm,
            context,
        }
    }
}

/// A scan bin calibrated by a saved model set, with no reference pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPrediction {
    pub window_start: DateTime<Utc>,
    pub scan_bpm: f64,
    pub coverage_s: f64,
    pub sleep_status: u32,
    pub is_active: bool,
    pub predicted_bpm: f64,
    pub context: Context,
}

/// Physiological context a model is trained for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Rest,
    Active,
    Global,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Rest => "rest",
            Context::Active => "active",
            Context::Global => "global",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calibration curve family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Isotonic regression knots evaluated by linear interpolation
    Isotonic,
    /// Binned-median knots evaluated by shape-preserving cubic interpolation
    #[default]
    #[serde(alias = "pchip", alias = "piecewise-monotone")]
    PiecewiseMonotone,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Isotonic => "isotonic",
            ModelKind::PiecewiseMonotone => "piecewise_monotone",
        }
    }
}

impl FromStr for ModelKind {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "isotonic" => Ok(ModelKind::Isotonic),
            "piecewise_monotone" | "piecewise-monotone" | "pchip" => {
                Ok(ModelKind::PiecewiseMonotone)
            }
            other => Err(CalibrationError::UnsupportedModel(other.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fitted monotone calibration curve as a portable knot table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub kind: ModelKind,
    pub context: Context,
    /// Strictly increasing scan bpm knots
    pub x_knots: Vec<f64>,
    /// Calibrated bpm at each knot
    pub y_knots: Vec<f64>,
    pub clip_lo: f64,
    pub clip_hi: f64,
}

impl CalibrationModel {
    /// Check the knot table invariants
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.x_knots.is_empty() {
            return Err(CalibrationError::InvalidModel(format!(
                "{} model has no knots",
                self.context
            )));
        }
        if self.x_knots.len() != self.y_knots.len() {
            return Err(CalibrationError::InvalidModel(format!(
                "{} model has {} x knots but {} y knots",
                self.context,
                self.x_knots.len(),
                self.y_knots.len()
            )));
        }
        if self
            .x_knots
            .iter()
            .chain(self.y_knots.iter())
            .any(|v| !v.is_finite())
        {
            return Err(CalibrationError::InvalidModel(format!(
                "{} model contains non-finite knots",
                self.context
            )));
        }
        if self.x_knots.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CalibrationError::InvalidModel(format!(
                "{} model x knots are not strictly increasing",
                self.context
            )));
        }
        if self.clip_lo > self.clip_hi {
            return Err(CalibrationError::InvalidModel(format!(
                "{} model clip range [{}, {}] is inverted",
                self.context, self.clip_lo, self.clip_hi
            )));
        }
        Ok(())
    }

    /// Domain covered by the knots
    pub fn domain(&self) -> Option<(f64, f64)> {
        match (self.x_knots.first(), self.x_knots.last()) {
            (Some(lo), Some(hi)) => Some((*lo, *hi)),
            _ => None,
        }
    }
}

/// Heart-rate zone of the uncalibrated scan value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HeartRateZone {
    #[serde(rename = "<60")]
    VeryLow,
    #[serde(rename = "60-90")]
    Low,
    #[serde(rename = "90-120")]
    Moderate,
    #[serde(rename = ">120")]
    High,
}

impl HeartRateZone {
    /// Classify a heart rate into its zone
    pub fn classify(bpm: f64) -> Self {
        if bpm < 60.0 {
            HeartRateZone::VeryLow
        } else if bpm < 90.0 {
            HeartRateZone::Low
        } else if bpm < 120.0 {
            HeartRateZone::Moderate
        } else {
            HeartRateZone::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HeartRateZone::VeryLow => "<60",
            HeartRateZone::Low => "60-90",
            HeartRateZone::Moderate => "90-120",
            HeartRateZone::High => ">120",
        }
    }
}

/// Accuracy of a model within one heart-rate zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub zone: HeartRateZone,
    pub n: usize,
    /// Mean of |reference - predicted|
    pub mae: f64,
    /// Mean of reference - predicted
    pub bias: f64,
}

/// Training outcome for one context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextReport {
    pub metrics: Vec<MetricsRow>,
    pub n: usize,
    pub model: CalibrationModel,
}

/// Metrics over every calibrated record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallReport {
    pub metrics: Vec<MetricsRow>,
    pub n: usize,
}

/// Exportable result of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub chosen_models: BTreeMap<Context, CalibrationModel>,
    pub contexts: BTreeMap<Context, ContextReport>,
    pub overall: OverallReport,
}
