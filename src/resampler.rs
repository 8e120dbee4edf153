//! Overlap resampling
//!
//! Scan-device rows report variable-length segments that rarely line up with
//! bin boundaries. Each segment's value is spread over every bin it touches,
//! weighted by the exact seconds of overlap, so a bin's value reflects the
//! time actually sampled rather than whichever segment happened to start in it.

use crate::time::{overlap_seconds, BinSize};
use crate::types::{ResampledPoint, ScanRecord};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Longest single segment accepted; longer entries are treated as malformed
pub const MAX_SEGMENT_SECONDS: i64 = 86_400;

/// Running totals for one bin
#[derive(Debug, Clone, Copy, Default)]
struct BinAccumulator {
    weighted_sum: f64,
    coverage_s: f64,
}

/// Time-weighted resampler for scan-device segments
pub struct OverlapResampler;

impl OverlapResampler {
    /// Resample scan rows onto the bin grid.
    ///
    /// Bins with less than `min(min_coverage_s, bin width)` seconds of data are
    /// dropped. Output is ordered by `window_start`.
    pub fn resample(
        records: &[ScanRecord],
        min_coverage_s: f64,
        bin_size: BinSize,
    ) -> Vec<ResampledPoint> {
        let mut bins: BTreeMap<DateTime<Utc>, BinAccumulator> = BTreeMap::new();

        for (index, record) in records.iter().enumerate() {
            if record.durations.len() != record.values.len() {
                warn!(
                    row = index,
                    durations = record.durations.len(),
                    values = record.values.len(),
                    "skipping scan row with mismatched duration/value lists"
                );
                continue;
            }
            accumulate_record(record, bin_size, &mut bins);
        }

        let threshold = min_coverage_s.min(bin_size.seconds() as f64);
        let touched = bins.len();

        let points: Vec<ResampledPoint> = bins
            .into_iter()
            .filter(|(_, acc)| acc.coverage_s >= threshold)
            .map(|(window_start, acc)| ResampledPoint {
                window_start,
                scan_bpm: if acc.coverage_s > 0.0 {
                    Some(acc.weighted_sum / acc.coverage_s)
                } else {
                    None
                },
                coverage_s: acc.coverage_s,
            })
            .collect();

        debug!(
            rows = records.len(),
            touched_bins = touched,
            kept_bins = points.len(),
            min_coverage_s = threshold,
            "resampled scan segments"
        );

        points
    }
}

/// Walk one row's back-to-back segments and accumulate them into `bins`
fn accumulate_record(
    record: &ScanRecord,
    bin_size: BinSize,
    bins: &mut BTreeMap<DateTime<Utc>, BinAccumulator>,
) {
    let mut cursor = record.start;

    for (duration, value) in record.durations.iter().zip(record.values.iter()) {
        // Entries without a usable duration do not move the cursor
        let seconds = match duration {
            Some(d) if d.is_finite() && *d > 0.0 => d.trunc(),
            _ => continue,
        };
        let segment_end = if seconds <= MAX_SEGMENT_SECONDS as f64 {
            Duration::try_seconds(seconds as i64).and_then(|d| cursor.checked_add_signed(d))
        } else {
            None
        };
        let Some(segment_end) = segment_end else {
            warn!(
                start = %record.start,
                duration_s = seconds,
                "skipping scan segment with out-of-range duration"
            );
            continue;
        };

        let segment_start = cursor;
        cursor = segment_end;

        let value = match value {
            Some(v) if v.is_finite() => *v,
            _ => continue,
        };

        accumulate_segment(segment_start, segment_end, value, bin_size, bins);
    }
}

/// Spread one segment over every bin it overlaps
fn accumulate_segment(
    segment_start: DateTime<Utc>,
    segment_end: DateTime<Utc>,
    value: f64,
    bin_size: BinSize,
    bins: &mut BTreeMap<DateTime<Utc>, BinAccumulator>,
) {
    if segment_end <= segment_start {
        return;
    }

    // Last bin is the one holding the final instant before the segment ends
    let last_window = bin_size.floor(segment_end - Duration::nanoseconds(1));
    let mut window = bin_size.floor(segment_start);

    while window <= last_window {
        let window_end = bin_size.end_of(window);
        let overlap = overlap_seconds(segment_start, segment_end, window, window_end);
        if overlap > 0.0 {
            let acc = bins.entry(window).or_default();
            acc.weighted_sum += value * overlap;
            acc.coverage_s += overlap;
        }
        if window_end <= window || window_end == DateTime::<Utc>::MAX_UTC {
            break;
        }
        window = window_end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 8, 0, 0).unwrap()
    }

    fn minute() -> BinSize {
        BinSize::default()
    }

    #[test]
    fn test_empty_input() {
        assert!(OverlapResampler::resample(&[], 30.0, minute()).is_empty());
    }

    #[test]
    fn test_segment_inside_one_bin() {
        let record = ScanRecord::single(t0() + Duration::seconds(10), 40.0, 72.0);
        let points = OverlapResampler::resample(&[record], 30.0, minute());

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].window_start, t0());
        assert_eq!(points[0].scan_bpm, Some(72.0));
        assert_eq!(points[0].coverage_s, 40.0);
    }

    #[test]
    fn test_coverage_is_conserved_across_bins() {
        // 200 s starting 25 s into a minute touches four bins
        let record = ScanRecord::single(t0() + Duration::seconds(25), 200.0, 88.0);
        let points = OverlapResampler::resample(&[record], 0.0, minute());

        assert_eq!(points.len(), 4);
        let total: f64 = points.iter().map(|p| p.coverage_s).sum();
        assert!((total - 200.0).abs() < 1e-9);
        assert_eq!(points[0].coverage_s, 35.0);
        assert_eq!(points[3].coverage_s, 45.0);
        assert!(points.iter().all(|p| p.scan_bpm == Some(88.0)));
    }

    #[test]
    fn test_sub_second_start_conserves_coverage() {
        let start = t0() + Duration::milliseconds(500);
        let record = ScanRecord::single(start, 60.0, 70.0);
        let points = OverlapResampler::resample(&[record], 0.0, minute());

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].window_start, t0());
        assert_eq!(points[0].coverage_s, 59.5);
        assert_eq!(points[1].window_start, t0() + Duration::seconds(60));
        assert_eq!(points[1].coverage_s, 0.5);
        assert!(points.iter().all(|p| p.scan_bpm == Some(70.0)));
    }

    #[test]
    fn test_coverage_conserved_for_any_alignment() {
        for offset_ms in [0, 1, 250, 999, 30_000, 59_999] {
            let start = t0() + Duration::milliseconds(offset_ms);
            let record = ScanRecord::single(start, 125.0, 80.0);
            let points = OverlapResampler::resample(&[record], 0.0, minute());

            let total: f64 = points.iter().map(|p| p.coverage_s).sum();
            assert!((total - 125.0).abs() < 1e-9, "offset {offset_ms} ms gave {total}");
        }
    }

    #[test]
    fn test_oversized_durations_are_skipped() {
        let record = ScanRecord {
            start: t0(),
            durations: vec![Some(1e17), Some(f64::MAX), Some(1e9), Some(60.0)],
            values: vec![Some(70.0), Some(70.0), Some(70.0), Some(90.0)],
        };
        let points = OverlapResampler::resample(&[record], 30.0, minute());

        // Skipped entries leave the cursor in place
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].window_start, t0());
        assert_eq!(points[0].scan_bpm, Some(90.0));
    }

    #[test]
    fn test_segment_near_end_of_time_does_not_overflow() {
        let start = DateTime::<Utc>::MAX_UTC - Duration::seconds(30);
        let record = ScanRecord::single(start, 600.0, 70.0);

        assert!(OverlapResampler::resample(&[record], 0.0, minute()).is_empty());
    }

    #[test]
    fn test_time_weighted_average() {
        // 45 s at 60 bpm then 15 s at 100 bpm in the same minute
        let record = ScanRecord {
            start: t0(),
            durations: vec![Some(45.0), Some(15.0)],
            values: vec![Some(60.0), Some(100.0)],
        };
        let points = OverlapResampler::resample(&[record], 30.0, minute());

        assert_eq!(points.len(), 1);
        let expected = (60.0 * 45.0 + 100.0 * 15.0) / 60.0;
        assert!((points[0].scan_bpm.unwrap() - expected).abs() < 1e-9);
        assert_eq!(points[0].coverage_s, 60.0);
    }

    #[test]
    fn test_min_coverage_filter() {
        let records = vec![
            ScanRecord::single(t0(), 20.0, 70.0),
            ScanRecord::single(t0() + Duration::seconds(60), 30.0, 75.0),
        ];
        let points = OverlapResampler::resample(&records, 30.0, minute());

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].window_start, t0() + Duration::seconds(60));
    }

    #[test]
    fn test_min_coverage_capped_by_bin_width() {
        // A 120 s threshold on 30 s bins behaves like a 30 s threshold
        let bins = BinSize::from_seconds(30).unwrap();
        let record = ScanRecord::single(t0(), 60.0, 64.0);
        let points = OverlapResampler::resample(&[record], 120.0, bins);

        assert_eq!(points.len(), 2);
    }

    #[test]
    fn test_mismatched_lists_are_skipped() {
        let bad = ScanRecord {
            start: t0(),
            durations: vec![Some(60.0), Some(60.0)],
            values: vec![Some(70.0)],
        };
        let good = ScanRecord::single(t0() + Duration::seconds(120), 60.0, 80.0);
        let points = OverlapResampler::resample(&[bad, good], 30.0, minute());

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].scan_bpm, Some(80.0));
    }

    #[test]
    fn test_invalid_durations_do_not_advance_cursor() {
        let record = ScanRecord {
            start: t0(),
            durations: vec![None, Some(0.0), Some(-5.0), Some(60.0)],
            values: vec![Some(50.0), Some(50.0), Some(50.0), Some(90.0)],
        };
        let points = OverlapResampler::resample(&[record], 30.0, minute());

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].window_start, t0());
        assert_eq!(points[0].scan_bpm, Some(90.0));
    }

    #[test]
    fn test_missing_value_still_advances_cursor() {
        let record = ScanRecord {
            start: t0(),
            durations: vec![Some(60.0), Some(60.0)],
            values: vec![None, Some(95.0)],
        };
        let points = OverlapResampler::resample(&[record], 30.0, minute());

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].window_start, t0() + Duration::seconds(60));
    }

    #[test]
    fn test_output_is_time_ordered() {
        let records = vec![
            ScanRecord::single(t0() + Duration::seconds(300), 60.0, 70.0),
            ScanRecord::single(t0(), 60.0, 71.0),
            ScanRecord::single(t0() + Duration::seconds(120), 60.0, 72.0),
        ];
        let points = OverlapResampler::resample(&records, 30.0, minute());

        let starts: Vec<_> = points.iter().map(|p| p.window_start).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
        assert_eq!(points.len(), 3);
    }

    #[test]
    fn test_overlapping_rows_accumulate() {
        let records = vec![
            ScanRecord::single(t0(), 30.0, 60.0),
            ScanRecord::single(t0(), 30.0, 80.0),
        ];
        let points = OverlapResampler::resample(&records, 30.0, minute());

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].coverage_s, 60.0);
        assert_eq!(points[0].scan_bpm, Some(70.0));
    }
}
