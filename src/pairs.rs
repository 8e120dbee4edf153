//! Paired dataset construction
//!
//! Aligns resampled scan bins with reference-device bins on the same grid,
//! keeps only physiologically plausible pairs and attaches context labels and
//! temporal features.

use crate::annotator::ContextAnnotator;
use crate::config::{CalibrationConfig, DEFAULT_MIN_SCAN_COVERAGE_S, MIN_REFERENCE_POINTS};
use crate::error::CalibrationError;
use crate::resampler::OverlapResampler;
use crate::source::ReferenceSource;
use crate::time::{day_of_week, hour_of, BinSize};
use crate::types::{
    PairedRecord, ReferenceAggregate, ReferenceSample, ScanRecord, HR_VALID_MAX, HR_VALID_MIN,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Mean and count of reference samples per bin, ordered by bin start.
///
/// Non-finite samples are ignored.
pub fn aggregate_reference(samples: &[ReferenceSample], bin_size: BinSize) -> Vec<ReferenceAggregate> {
    let mut bins: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();

    for sample in samples.iter().filter(|s| s.heart_rate.is_finite()) {
        let entry = bins.entry(bin_size.floor(sample.time)).or_insert((0.0, 0));
        entry.0 += sample.heart_rate;
        entry.1 += 1;
    }

    bins.into_iter()
        .map(|(window_start, (sum, count))| ReferenceAggregate {
            window_start,
            reference_bpm: sum / count as f64,
            point_count: count,
        })
        .collect()
}

/// Builder for the paired scan/reference dataset
#[derive(Debug, Clone)]
pub struct PairBuilder {
    bin_size: BinSize,
    min_coverage_s: f64,
    valid_range: (f64, f64),
    min_reference_points: usize,
}

impl Default for PairBuilder {
    fn default() -> Self {
        Self::new(BinSize::default(), DEFAULT_MIN_SCAN_COVERAGE_S)
    }
}

impl PairBuilder {
    /// Create a builder with the default plausibility filters
    pub fn new(bin_size: BinSize, min_coverage_s: f64) -> Self {
        Self {
            bin_size,
            min_coverage_s,
            valid_range: (HR_VALID_MIN, HR_VALID_MAX),
            min_reference_points: MIN_REFERENCE_POINTS,
        }
    }

    /// Create a builder from a run configuration
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            bin_size: config.bin_size,
            min_coverage_s: config.min_scan_coverage_s,
            valid_range: config.valid_range(),
            min_reference_points: config.min_reference_points,
        }
    }

    pub fn bin_size(&self) -> BinSize {
        self.bin_size
    }

    /// Build the paired dataset, ordered by bin start.
    ///
    /// Fails with [`CalibrationError::NoData`] when no bin survives the join
    /// and filters.
    pub fn build(
        &self,
        scan: &[ScanRecord],
        reference: &dyn ReferenceSource,
    ) -> Result<Vec<PairedRecord>, CalibrationError> {
        let resampled = OverlapResampler::resample(scan, self.min_coverage_s, self.bin_size);
        let aggregates = aggregate_reference(&reference.heart_rate_samples()?, self.bin_size);
        let sleep = reference.sleep_intervals()?;
        let activity = reference.activity_intervals()?;

        let by_window: BTreeMap<DateTime<Utc>, &ReferenceAggregate> =
            aggregates.iter().map(|a| (a.window_start, a)).collect();

        let (lo, hi) = self.valid_range;
        let plausible = |bpm: f64| bpm >= lo && bpm <= hi;

        let mut joined = 0usize;
        let mut pairs: Vec<PairedRecord> = Vec::new();

        for point in &resampled {
            let Some(aggregate) = by_window.get(&point.window_start) else {
                continue;
            };
            joined += 1;

            let Some(scan_bpm) = point.scan_bpm else {
                continue;
            };
            if !plausible(scan_bpm)
                || !plausible(aggregate.reference_bpm)
                || aggregate.point_count < self.min_reference_points
            {
                continue;
            }

            pairs.push(PairedRecord {
                window_start: point.window_start,
                scan_bpm,
                reference_bpm: aggregate.reference_bpm,
                reference_points: aggregate.point_count,
                coverage_s: point.coverage_s,
                sleep_status: 0,
                is_active: false,
                hour: hour_of(point.window_start),
                day_of_week: day_of_week(point.window_start),
            });
        }

        if pairs.is_empty() {
            return Err(CalibrationError::NoData(format!(
                "no paired bins after filtering ({} scan bins, {} reference bins, {} joined)",
                resampled.len(),
                aggregates.len(),
                joined
            )));
        }

        let windows: Vec<DateTime<Utc>> = pairs.iter().map(|p| p.window_start).collect();
        let contexts = ContextAnnotator::annotate(&windows, &sleep, &activity, self.bin_size);
        for (pair, context) in pairs.iter_mut().zip(contexts) {
            pair.sleep_status = context.sleep_status;
            pair.is_active = context.is_active;
        }

        debug!(
            scan_bins = resampled.len(),
            reference_bins = aggregates.len(),
            joined,
            sleep_intervals = sleep.len(),
            activity_intervals = activity.len(),
            "joined scan and reference bins"
        );
        info!(pairs = pairs.len(), bin_size = %self.bin_size, "built paired dataset");

        Ok(pairs)
    }
}
