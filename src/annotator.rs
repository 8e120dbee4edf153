//! Interval context annotation
//!
//! Labels each time bin with the sleep status of the sleep record that
//! overlaps it the most, and flags it as active when any activity record
//! touches it at all.
//!
//! This is a straight O(bins x intervals) scan. Batch calibration runs cover
//! days to weeks of data, so the interval sets stay small.

use crate::time::{overlap_seconds, BinSize};
use crate::types::{ActivityInterval, BinContext, SleepInterval};
use chrono::{DateTime, Utc};

/// Annotator for sleep status and activity flags
pub struct ContextAnnotator;

impl ContextAnnotator {
    /// Annotate the bins starting at each of `window_starts`.
    ///
    /// Returns one [`BinContext`] per input window, in input order.
    pub fn annotate(
        window_starts: &[DateTime<Utc>],
        sleep: &[SleepInterval],
        activity: &[ActivityInterval],
        bin_size: BinSize,
    ) -> Vec<BinContext> {
        window_starts
            .iter()
            .map(|&start| {
                let end = bin_size.end_of(start);
                BinContext {
                    sleep_status: sleep_status_for(start, end, sleep),
                    is_active: is_active_for(start, end, activity),
                }
            })
            .collect()
    }
}

/// Status of the sleep interval with the largest overlap; first seen wins ties
fn sleep_status_for(
    bin_start: DateTime<Utc>,
    bin_end: DateTime<Utc>,
    sleep: &[SleepInterval],
) -> u32 {
    let mut best_status = 0;
    let mut best_overlap = 0.0;

    for interval in sleep {
        let overlap = overlap_seconds(bin_start, bin_end, interval.start, interval.end);
        if overlap > best_overlap {
            best_overlap = overlap;
            best_status = interval.status;
        }
    }

    best_status
}

fn is_active_for(
    bin_start: DateTime<Utc>,
    bin_end: DateTime<Utc>,
    activity: &[ActivityInterval],
) -> bool {
    activity
        .iter()
        .any(|interval| interval.start < bin_end && interval.end > bin_start)
}
