//! Time grid helpers
//!
//! Bins are epoch-aligned, left-closed windows of a whole number of seconds.
//! Everything in the pipeline is expressed in UTC.

use crate::error::CalibrationError;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Default bin width in seconds (one minute)
pub const DEFAULT_BIN_SECONDS: i64 = 60;

/// Width of a time bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinSize {
    seconds: i64,
}

impl Default for BinSize {
    fn default() -> Self {
        Self {
            seconds: DEFAULT_BIN_SECONDS,
        }
    }
}

impl BinSize {
    /// Create a bin size from a positive number of seconds
    pub fn from_seconds(seconds: i64) -> Result<Self, CalibrationError> {
        if seconds <= 0 {
            return Err(CalibrationError::InvalidBinSize(format!(
                "bin width must be positive, got {seconds}s"
            )));
        }
        if Duration::try_seconds(seconds).is_none() {
            return Err(CalibrationError::InvalidBinSize(format!(
                "bin width of {seconds}s is out of range"
            )));
        }
        Ok(Self { seconds })
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn as_duration(&self) -> Duration {
        // from_seconds keeps the width representable
        Duration::try_seconds(self.seconds).unwrap_or(Duration::MAX)
    }

    /// Floor an instant onto the bin grid
    pub fn floor(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let secs = instant.timestamp();
        let floored = secs - secs.rem_euclid(self.seconds);
        // Always in range: floored <= secs for a valid timestamp
        Utc.timestamp_opt(floored, 0).single().unwrap_or(instant)
    }

    /// Right edge of the bin starting at `start`, saturating at the latest
    /// representable instant
    pub fn end_of(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_signed(self.as_duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl FromStr for BinSize {
    type Err = CalibrationError;

    /// Parse a frequency string such as `1min`, `30S`, `5T`, `1h` or a bare
    /// number of seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CalibrationError::InvalidBinSize("empty bin size".to_string()));
        }
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);

        let count: i64 = if number.is_empty() {
            1
        } else {
            number
                .parse()
                .map_err(|_| CalibrationError::InvalidBinSize(s.to_string()))?
        };

        let multiplier = match unit.trim() {
            "" | "s" | "S" | "sec" | "secs" | "second" | "seconds" => 1,
            "min" | "mins" | "minute" | "minutes" | "T" | "m" => 60,
            "h" | "H" | "hour" | "hours" => 3600,
            _ => return Err(CalibrationError::InvalidBinSize(s.to_string())),
        };

        count
            .checked_mul(multiplier)
            .ok_or_else(|| CalibrationError::InvalidBinSize(s.to_string()))
            .and_then(Self::from_seconds)
            .map_err(|_| CalibrationError::InvalidBinSize(s.to_string()))
    }
}

impl fmt::Display for BinSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds % 3600 == 0 {
            write!(f, "{}h", self.seconds / 3600)
        } else if self.seconds % 60 == 0 {
            write!(f, "{}min", self.seconds / 60)
        } else {
            write!(f, "{}s", self.seconds)
        }
    }
}

impl Serialize for BinSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BinSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse an RFC 3339 / ISO 8601 timestamp that carries an explicit offset
/// and convert it to UTC. Naive timestamps are rejected.
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, CalibrationError> {
    let trimmed = raw.trim();
    DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CalibrationError::DateParseError(format!(
                "'{trimmed}' must be an ISO 8601 timestamp with offset ({e})"
            ))
        })
}

/// Hour of day (0-23, UTC)
pub fn hour_of(instant: DateTime<Utc>) -> u32 {
    instant.hour()
}

/// Day of week, Monday = 0 through Sunday = 6
pub fn day_of_week(instant: DateTime<Utc>) -> u32 {
    instant.weekday().num_days_from_monday()
}

/// Overlap between two half-open intervals, in whole-or-fractional seconds
pub fn overlap_seconds(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> f64 {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    if end <= start {
        return 0.0;
    }
    let span = end - start;
    span.num_seconds() as f64 + f64::from(span.subsec_nanos()) / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, s).unwrap()
    }

    #[test]
    fn test_parse_bin_sizes() {
        assert_eq!("1min".parse::<BinSize>().unwrap().seconds(), 60);
        assert_eq!("30S".parse::<BinSize>().unwrap().seconds(), 30);
        assert_eq!("30s".parse::<BinSize>().unwrap().seconds(), 30);
        assert_eq!("5T".parse::<BinSize>().unwrap().seconds(), 300);
        assert_eq!("1h".parse::<BinSize>().unwrap().seconds(), 3600);
        assert_eq!("90".parse::<BinSize>().unwrap().seconds(), 90);
        assert_eq!("min".parse::<BinSize>().unwrap().seconds(), 60);
    }

    #[test]
    fn test_reject_bad_bin_sizes() {
        assert!("0min".parse::<BinSize>().is_err());
        assert!("3 fortnights".parse::<BinSize>().is_err());
        assert!("".parse::<BinSize>().is_err());
        assert!("-5min".parse::<BinSize>().is_err());
    }

    #[test]
    fn test_oversized_bin_sizes_rejected() {
        assert!(matches!(
            "9999999999999999h".parse::<BinSize>(),
            Err(CalibrationError::InvalidBinSize(_))
        ));
        assert!(matches!(
            "9999999999999999s".parse::<BinSize>(),
            Err(CalibrationError::InvalidBinSize(_))
        ));
        assert!(matches!(
            "99999999999999999999min".parse::<BinSize>(),
            Err(CalibrationError::InvalidBinSize(_))
        ));
        assert!(BinSize::from_seconds(i64::MAX).is_err());
    }

    #[test]
    fn test_bin_end_saturates() {
        let widest = BinSize::from_seconds(i64::MAX / 1000).unwrap();
        assert_eq!(widest.end_of(at(10, 0, 0)), DateTime::<Utc>::MAX_UTC);
        assert_eq!(BinSize::default().end_of(at(10, 0, 0)), at(10, 1, 0));
    }

    #[test]
    fn test_overlap_seconds_sub_second() {
        let half = at(10, 0, 0) + Duration::milliseconds(500);
        assert_eq!(overlap_seconds(half, at(10, 1, 0), at(10, 0, 0), at(10, 1, 0)), 59.5);
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for raw in ["1min", "30s", "2h", "90s"] {
            let size: BinSize = raw.parse().unwrap();
            assert_eq!(size.to_string().parse::<BinSize>().unwrap(), size);
        }
    }

    #[test]
    fn test_floor_to_grid() {
        let minute = BinSize::default();
        assert_eq!(minute.floor(at(10, 15, 42)), at(10, 15, 0));
        assert_eq!(minute.floor(at(10, 15, 0)), at(10, 15, 0));

        let five = BinSize::from_seconds(300).unwrap();
        assert_eq!(five.floor(at(10, 14, 59)), at(10, 10, 0));
    }

    #[test]
    fn test_parse_instant_requires_offset() {
        let parsed = parse_instant("2024-03-04T11:15:00+01:00").unwrap();
        assert_eq!(parsed, at(10, 15, 0));

        let zulu = parse_instant("2024-03-04T10:15:00Z").unwrap();
        assert_eq!(zulu, at(10, 15, 0));

        let spaced = parse_instant("2024-03-04 12:15:00+02:00").unwrap();
        assert_eq!(spaced, at(10, 15, 0));

        assert!(matches!(
            parse_instant("2024-03-04T10:15:00"),
            Err(CalibrationError::DateParseError(_))
        ));
    }

    #[test]
    fn test_overlap_seconds() {
        assert_eq!(overlap_seconds(at(10, 0, 0), at(10, 1, 0), at(10, 0, 30), at(10, 2, 0)), 30.0);
        assert_eq!(overlap_seconds(at(10, 0, 0), at(10, 1, 0), at(10, 1, 0), at(10, 2, 0)), 0.0);
        assert_eq!(overlap_seconds(at(10, 0, 0), at(10, 1, 0), at(9, 0, 0), at(11, 0, 0)), 60.0);
    }

    #[test]
    fn test_temporal_features() {
        // 2024-03-04 is a Monday
        assert_eq!(day_of_week(at(10, 0, 0)), 0);
        assert_eq!(hour_of(at(23, 59, 59)), 23);
    }
}
