//! Zone-stratified accuracy metrics

use crate::types::{HeartRateZone, MetricsRow};
use std::collections::BTreeMap;

/// One evaluated observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Residual {
    /// Uncalibrated scan value, used for zoning
    pub scan_bpm: f64,
    pub reference_bpm: f64,
    pub predicted_bpm: f64,
}

/// Calculator for per-zone MAE and bias
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Group residuals by the zone of the scan value and report count, mean
    /// absolute error and mean signed bias (`reference - predicted`) per zone.
    ///
    /// Empty zones are omitted; rows come out in zone order.
    pub fn evaluate<I>(residuals: I) -> Vec<MetricsRow>
    where
        I: IntoIterator<Item = Residual>,
    {
        // (count, sum |err|, sum err)
        let mut zones: BTreeMap<HeartRateZone, (usize, f64, f64)> = BTreeMap::new();

        for r in residuals {
            let error = r.reference_bpm - r.predicted_bpm;
            let entry = zones
                .entry(HeartRateZone::classify(r.scan_bpm))
                .or_insert((0, 0.0, 0.0));
            entry.0 += 1;
            entry.1 += error.abs();
            entry.2 += error;
        }

        zones
            .into_iter()
            .map(|(zone, (n, abs_sum, sum))| MetricsRow {
                zone,
                n,
                mae: abs_sum / n as f64,
                bias: sum / n as f64,
            })
            .collect()
    }

    /// Mean absolute error over every residual, None when empty
    pub fn overall_mae<I>(residuals: I) -> Option<f64>
    where
        I: IntoIterator<Item = Residual>,
    {
        let (n, total) = residuals.into_iter().fold((0usize, 0.0), |(n, total), r| {
            (n + 1, total + (r.reference_bpm - r.predicted_bpm).abs())
        });
        if n == 0 {
            None
        } else {
            Some(total / n as f64)
        }
    }
}
