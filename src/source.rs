//! Input adapters
//!
//! The calibration core consumes typed records. This module maps the raw
//! exports of both devices onto them:
//! - scan-device CSV rows (`start`, `duration`, `value`, the last two holding
//!   list literals such as `[60, 60, 30]`)
//! - reference-device JSON bundles with heart-rate samples, sleep records and
//!   sport records, optionally tagged with a subject id

use crate::error::CalibrationError;
use crate::time::parse_instant;
use crate::types::{ActivityInterval, ReferenceSample, ScanRecord, SleepInterval};
use chrono::Duration;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Source of reference-device data, already normalized to UTC instants
pub trait ReferenceSource {
    /// Raw heart-rate samples
    fn heart_rate_samples(&self) -> Result<Vec<ReferenceSample>, CalibrationError>;

    /// Sleep records with their status ordinal
    fn sleep_intervals(&self) -> Result<Vec<SleepInterval>, CalibrationError>;

    /// Sport/activity records
    fn activity_intervals(&self) -> Result<Vec<ActivityInterval>, CalibrationError>;
}

/// Reference data held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryReference {
    pub samples: Vec<ReferenceSample>,
    pub sleep: Vec<SleepInterval>,
    pub activity: Vec<ActivityInterval>,
}

impl InMemoryReference {
    pub fn new(
        samples: Vec<ReferenceSample>,
        sleep: Vec<SleepInterval>,
        activity: Vec<ActivityInterval>,
    ) -> Self {
        Self {
            samples,
            sleep,
            activity,
        }
    }
}

impl ReferenceSource for InMemoryReference {
    fn heart_rate_samples(&self) -> Result<Vec<ReferenceSample>, CalibrationError> {
        Ok(self.samples.clone())
    }

    fn sleep_intervals(&self) -> Result<Vec<SleepInterval>, CalibrationError> {
        for interval in &self.sleep {
            check_interval(interval.start, interval.end, "sleep")?;
        }
        Ok(self.sleep.clone())
    }

    fn activity_intervals(&self) -> Result<Vec<ActivityInterval>, CalibrationError> {
        for interval in &self.activity {
            check_interval(interval.start, interval.end, "activity")?;
        }
        Ok(self.activity.clone())
    }
}

/// Reference-device export as JSON
///
/// ```json
/// {
///   "heartRate": [{"time": "2024-05-20T08:00:05+02:00", "heartRate": 71, "userId": 1}],
///   "sleep": [{"startTime": "...", "endTime": "...", "status": 2}],
///   "sport": [{"sportId": 9, "time": "...", "duration": 1800, "sportType": 4}]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonReference {
    #[serde(default)]
    heart_rate: Vec<JsonHeartRate>,
    #[serde(default)]
    sleep: Vec<JsonSleep>,
    #[serde(default)]
    sport: Vec<JsonSport>,
    #[serde(skip)]
    user_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonHeartRate {
    time: String,
    heart_rate: f64,
    #[serde(default)]
    user_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonSleep {
    start_time: String,
    end_time: String,
    status: u32,
    #[serde(default)]
    user_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonSport {
    #[serde(default)]
    sport_id: Option<i64>,
    time: String,
    /// Seconds
    duration: f64,
    #[serde(default)]
    sport_type: Option<i64>,
    #[serde(default)]
    user_id: Option<i64>,
}

impl JsonReference {
    /// Parse a reference export, keeping only rows for `user_id` when given
    pub fn from_json(json: &str, user_id: Option<i64>) -> Result<Self, CalibrationError> {
        let mut reference: JsonReference = serde_json::from_str(json)?;
        reference.user_id = user_id;
        debug!(
            heart_rate = reference.heart_rate.len(),
            sleep = reference.sleep.len(),
            sport = reference.sport.len(),
            "loaded reference export"
        );
        Ok(reference)
    }

    /// Read and parse a reference export from disk
    pub fn from_path(path: &Path, user_id: Option<i64>) -> Result<Self, CalibrationError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json, user_id)
    }

    fn keeps(&self, row_user: Option<i64>) -> bool {
        match self.user_id {
            Some(wanted) => row_user == Some(wanted),
            None => true,
        }
    }
}

impl ReferenceSource for JsonReference {
    fn heart_rate_samples(&self) -> Result<Vec<ReferenceSample>, CalibrationError> {
        self.heart_rate
            .iter()
            .filter(|row| self.keeps(row.user_id))
            .map(|row| {
                Ok(ReferenceSample {
                    time: parse_instant(&row.time)?,
                    heart_rate: row.heart_rate,
                })
            })
            .collect()
    }

    fn sleep_intervals(&self) -> Result<Vec<SleepInterval>, CalibrationError> {
        let mut intervals = self
            .sleep
            .iter()
            .filter(|row| self.keeps(row.user_id))
            .map(|row| {
                let start = parse_instant(&row.start_time)?;
                let end = parse_instant(&row.end_time)?;
                check_interval(start, end, "sleep")?;
                Ok(SleepInterval {
                    start,
                    end,
                    status: row.status,
                })
            })
            .collect::<Result<Vec<_>, CalibrationError>>()?;
        intervals.sort_by_key(|i| i.start);
        Ok(intervals)
    }

    fn activity_intervals(&self) -> Result<Vec<ActivityInterval>, CalibrationError> {
        let mut intervals = self
            .sport
            .iter()
            .filter(|row| self.keeps(row.user_id))
            .map(|row| {
                let start = parse_instant(&row.time)?;
                if !row.duration.is_finite() {
                    return Err(CalibrationError::InvalidInterval(format!(
                        "sport record at {start} has non-finite duration"
                    )));
                }
                let end = Duration::try_milliseconds((row.duration * 1000.0).round() as i64)
                    .and_then(|duration| start.checked_add_signed(duration))
                    .ok_or_else(|| {
                        CalibrationError::InvalidInterval(format!(
                            "sport record at {start} has out-of-range duration {}s",
                            row.duration
                        ))
                    })?;
                check_interval(start, end, "sport")?;
                Ok(ActivityInterval {
                    start,
                    end,
                    activity_id: row.sport_id,
                    activity_type: row.sport_type,
                })
            })
            .collect::<Result<Vec<_>, CalibrationError>>()?;
        intervals.sort_by_key(|i| i.start);
        Ok(intervals)
    }
}

fn check_interval(
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
    kind: &str,
) -> Result<(), CalibrationError> {
    if end <= start {
        return Err(CalibrationError::InvalidInterval(format!(
            "{kind} interval ends at {end} which is not after its start {start}"
        )));
    }
    Ok(())
}

/// One raw scan CSV row before list parsing
#[derive(Debug, Deserialize)]
struct RawScanRow {
    start: String,
    duration: String,
    value: String,
}

/// Read scan-device rows from CSV
pub fn read_scan_csv<R: Read>(reader: R) -> Result<Vec<ScanRecord>, CalibrationError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut records = Vec::new();

    for (index, row) in csv_reader.deserialize::<RawScanRow>().enumerate() {
        let row = row?;
        let start = parse_instant(&row.start).map_err(|e| {
            CalibrationError::InvalidInput(format!("scan row {index}: {e}"))
        })?;
        let durations = parse_list_cell(&row.duration)
            .map_err(|e| CalibrationError::InvalidInput(format!("scan row {index} duration: {e}")))?;
        let values = parse_list_cell(&row.value)
            .map_err(|e| CalibrationError::InvalidInput(format!("scan row {index} value: {e}")))?;

        records.push(ScanRecord {
            start,
            durations,
            values,
        });
    }

    debug!(rows = records.len(), "loaded scan rows");
    Ok(records)
}

/// Read scan-device rows from a CSV file
pub fn read_scan_csv_path(path: &Path) -> Result<Vec<ScanRecord>, CalibrationError> {
    let file = std::fs::File::open(path)?;
    read_scan_csv(file)
}

/// Parse a list literal such as `[60, 60.5, None]`
fn parse_list_cell(cell: &str) -> Result<Vec<Option<f64>>, String> {
    let trimmed = cell.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|item| {
            let item = item.trim();
            match item {
                "None" | "null" | "nan" | "NaN" => Ok(None),
                _ => item
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| format!("'{item}' is not a number")),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const BUNDLE: &str = r#"{
        "heartRate": [
            {"time": "2024-05-20T10:00:05+02:00", "heartRate": 71, "userId": 1},
            {"time": "2024-05-20T10:00:35+02:00", "heartRate": 73, "userId": 1},
            {"time": "2024-05-20T10:00:40+02:00", "heartRate": 99, "userId": 2}
        ],
        "sleep": [
            {"startTime": "2024-05-20T01:00:00+02:00", "endTime": "2024-05-20T06:00:00+02:00", "status": 2, "userId": 1}
        ],
        "sport": [
            {"sportId": 9, "time": "2024-05-20T18:00:00+02:00", "duration": 1800, "sportType": 4, "userId": 1}
        ]
    }"#;

    #[test]
    fn test_json_reference_filters_by_user() {
        let reference = JsonReference::from_json(BUNDLE, Some(1)).unwrap();
        let samples = reference.heart_rate_samples().unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].time, Utc.with_ymd_and_hms(2024, 5, 20, 8, 0, 5).unwrap());
        assert_eq!(samples[0].heart_rate, 71.0);

        let everyone = JsonReference::from_json(BUNDLE, None).unwrap();
        assert_eq!(everyone.heart_rate_samples().unwrap().len(), 3);
    }

    #[test]
    fn test_json_reference_intervals() {
        let reference = JsonReference::from_json(BUNDLE, Some(1)).unwrap();

        let sleep = reference.sleep_intervals().unwrap();
        assert_eq!(sleep.len(), 1);
        assert_eq!(sleep[0].status, 2);
        assert_eq!(sleep[0].start, Utc.with_ymd_and_hms(2024, 5, 19, 23, 0, 0).unwrap());

        let sport = reference.activity_intervals().unwrap();
        assert_eq!(sport.len(), 1);
        assert_eq!(sport[0].end - sport[0].start, Duration::seconds(1800));
        assert_eq!(sport[0].activity_type, Some(4));
    }

    #[test]
    fn test_sport_with_oversized_duration_is_an_error() {
        for duration in ["1e300", "-1e300", "9e15"] {
            let json = format!(
                r#"{{"sport": [{{"time": "2024-05-20T10:00:00Z", "duration": {duration}}}]}}"#
            );
            let reference = JsonReference::from_json(&json, None).unwrap();

            assert!(matches!(
                reference.activity_intervals(),
                Err(CalibrationError::InvalidInterval(_))
            ));
        }
    }

    #[test]
    fn test_json_reference_rejects_naive_time() {
        let json = r#"{"heartRate": [{"time": "2024-05-20T10:00:05", "heartRate": 71}]}"#;
        let reference = JsonReference::from_json(json, None).unwrap();

        assert!(matches!(
            reference.heart_rate_samples(),
            Err(CalibrationError::DateParseError(_))
        ));
    }

    #[test]
    fn test_json_reference_rejects_inverted_sleep() {
        let json = r#"{"sleep": [{"startTime": "2024-05-20T06:00:00Z", "endTime": "2024-05-20T01:00:00Z", "status": 1}]}"#;
        let reference = JsonReference::from_json(json, None).unwrap();

        assert!(matches!(
            reference.sleep_intervals(),
            Err(CalibrationError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_read_scan_csv() {
        let csv = "start,duration,value\n\
                   2024-05-20T10:00:00+02:00,\"[60, 30]\",\"[72, 75.5]\"\n\
                   2024-05-20T10:05:00+02:00,[],[]\n\
                   2024-05-20T10:06:00+02:00,\"[60, None]\",\"[None, 80]\"\n";
        let records = read_scan_csv(csv.as_bytes()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].start, Utc.with_ymd_and_hms(2024, 5, 20, 8, 0, 0).unwrap());
        assert_eq!(records[0].durations, vec![Some(60.0), Some(30.0)]);
        assert_eq!(records[0].values, vec![Some(72.0), Some(75.5)]);
        assert!(records[1].durations.is_empty());
        assert_eq!(records[2].durations, vec![Some(60.0), None]);
        assert_eq!(records[2].values, vec![None, Some(80.0)]);
    }

    #[test]
    fn test_read_scan_csv_rejects_bad_cells() {
        let naive = "start,duration,value\n2024-05-20T10:00:00,[60],[72]\n";
        assert!(read_scan_csv(naive.as_bytes()).is_err());

        let garbage = "start,duration,value\n2024-05-20T10:00:00Z,[sixty],[72]\n";
        assert!(read_scan_csv(garbage.as_bytes()).is_err());
    }

    #[test]
    fn test_in_memory_reference_validates_intervals() {
        let t = Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap();
        let reference = InMemoryReference::new(
            vec![],
            vec![SleepInterval {
                start: t,
                end: t,
                status: 1,
            }],
            vec![],
        );

        assert!(reference.sleep_intervals().is_err());
        assert!(reference.activity_intervals().unwrap().is_empty());
    }
}
