//! Dataset and model export
//!
//! Calibrated rows go out as CSV with one column per field; the training
//! summary (chosen models, per-context and overall metrics) goes out as
//! pretty-printed JSON and can be loaded back to calibrate new scans.

use crate::error::CalibrationError;
use crate::types::{CalibratedRecord, CalibrationSummary, ScanPrediction};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Write serializable rows as CSV with a header line
pub fn write_csv<T, W>(rows: &[T], writer: W) -> Result<(), CalibrationError>
where
    T: Serialize,
    W: Write,
{
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write the calibrated paired dataset as CSV
pub fn write_pairs_csv<W: Write>(
    records: &[CalibratedRecord],
    writer: W,
) -> Result<(), CalibrationError> {
    write_csv(records, writer)
}

/// Write the calibrated paired dataset to a CSV file
pub fn write_pairs_csv_path(
    records: &[CalibratedRecord],
    path: &Path,
) -> Result<(), CalibrationError> {
    write_pairs_csv(records, File::create(path)?)?;
    debug!(rows = records.len(), path = %path.display(), "wrote calibrated dataset");
    Ok(())
}

/// Write calibrated scan bins as CSV
pub fn write_predictions_csv<W: Write>(
    predictions: &[ScanPrediction],
    writer: W,
) -> Result<(), CalibrationError> {
    write_csv(predictions, writer)
}

/// Pretty-printed JSON for a training summary
pub fn summary_to_json(summary: &CalibrationSummary) -> Result<String, CalibrationError> {
    Ok(serde_json::to_string_pretty(summary)?)
}

/// Parse a summary previously written by [`summary_to_json`].
///
/// Every chosen model is validated, so a hand-edited file with broken knots
/// is rejected here rather than at prediction time.
pub fn summary_from_json(json: &str) -> Result<CalibrationSummary, CalibrationError> {
    let summary: CalibrationSummary = serde_json::from_str(json)?;
    for model in summary.chosen_models.values() {
        model.validate()?;
    }
    Ok(summary)
}

pub fn write_summary_path(summary: &CalibrationSummary, path: &Path) -> Result<(), CalibrationError> {
    std::fs::write(path, summary_to_json(summary)?)?;
    debug!(models = summary.chosen_models.len(), path = %path.display(), "wrote model summary");
    Ok(())
}

pub fn read_summary_path(path: &Path) -> Result<CalibrationSummary, CalibrationError> {
    let json = std::fs::read_to_string(path)?;
    summary_from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CalibrationModel, Context, ContextReport, HeartRateZone, MetricsRow, ModelKind,
        OverallReport,
    };
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn record() -> CalibratedRecord {
        CalibratedRecord {
            window_start: Utc.with_ymd_and_hms(2024, 5, 20, 8, 30, 0).unwrap(),
            scan_bpm: 71.5,
            reference_bpm: 70.0,
            reference_points: 12,
            coverage_s: 60.0,
            sleep_status: 0,
            is_active: true,
            hour: 8,
            day_of_week: 0,
            predicted_bpm: 70.25,
            context: Context::Active,
        }
    }

    fn summary() -> CalibrationSummary {
        let model = CalibrationModel {
            kind: ModelKind::PiecewiseMonotone,
            context: Context::Active,
            x_knots: vec![55.0, 80.0, 120.0],
            y_knots: vec![57.0, 79.0, 118.0],
            clip_lo: 35.0,
            clip_hi: 220.0,
        };
        let metrics = vec![MetricsRow {
            zone: HeartRateZone::Low,
            n: 40,
            mae: 1.5,
            bias: -0.25,
        }];
        let mut chosen_models = BTreeMap::new();
        chosen_models.insert(Context::Active, model.clone());
        let mut contexts = BTreeMap::new();
        contexts.insert(
            Context::Active,
            ContextReport {
                metrics: metrics.clone(),
                n: 40,
                model,
            },
        );
        CalibrationSummary {
            chosen_models,
            contexts,
            overall: OverallReport { metrics, n: 40 },
        }
    }

    #[test]
    fn test_pairs_csv_layout() {
        let mut buffer = Vec::new();
        write_pairs_csv(&[record()], &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some(
                "window_start,scan_bpm,reference_bpm,reference_points,coverage_s,sleep_status,\
                 is_active,hour,day_of_week,predicted_bpm,context"
            )
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("2024-05-20T08:30:00Z,71.5,70.0,12,60.0,0,true,8,0,70.25,"));
        assert!(row.ends_with(",active"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_summary_json_keys() {
        let json = summary_to_json(&summary()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["chosen_models"]["active"]["kind"], "piecewise_monotone");
        assert_eq!(value["contexts"]["active"]["metrics"][0]["zone"], "60-90");
        assert_eq!(value["overall"]["n"], 40);
    }

    #[test]
    fn test_summary_file_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");

        write_summary_path(&summary(), &path).unwrap();
        let loaded = read_summary_path(&path).unwrap();

        assert_eq!(loaded, summary());
    }

    #[test]
    fn test_summary_with_broken_model_rejected() {
        let mut broken = summary();
        if let Some(model) = broken.chosen_models.get_mut(&Context::Active) {
            model.x_knots = vec![80.0, 55.0, 120.0];
        }
        let json = summary_to_json(&broken).unwrap();

        assert!(matches!(
            summary_from_json(&json),
            Err(CalibrationError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_pairs_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");

        write_pairs_csv_path(&[record(), record()], &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();

        assert_eq!(text.lines().count(), 3);
    }
}
