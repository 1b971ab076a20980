//! Half-open time intervals and gap-based merging.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Span given to instantaneous events (loud peaks, shot changes) so they can
/// still be represented as a non-empty interval.
pub const POINT_SPAN_SECS: f64 = 0.001;

/// Errors from constructing an interval.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntervalError {
    #[error("interval bounds must be finite: [{start}, {end})")]
    NotFinite { start: f64, end: f64 },

    #[error("interval start must be non-negative: {0}")]
    NegativeStart(f64),

    #[error("interval start must be before end: [{start}, {end})")]
    Empty { start: f64, end: f64 },
}

/// A time range `[start, end)` in seconds.
///
/// Always satisfies `0 <= start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "RawInterval")]
pub struct TimeInterval {
    start: f64,
    end: f64,
}

#[derive(Deserialize)]
struct RawInterval {
    start: f64,
    end: f64,
}

impl TryFrom<RawInterval> for TimeInterval {
    type Error = IntervalError;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        TimeInterval::new(raw.start, raw.end)
    }
}

impl TimeInterval {
    /// Create a validated interval.
    pub fn new(start: f64, end: f64) -> Result<Self, IntervalError> {
        if !start.is_finite() || !end.is_finite() {
            return Err(IntervalError::NotFinite { start, end });
        }
        if start < 0.0 {
            return Err(IntervalError::NegativeStart(start));
        }
        if start >= end {
            return Err(IntervalError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    /// Interval covering a single instant.
    pub fn point(at: f64) -> Result<Self, IntervalError> {
        Self::new(at, at + POINT_SPAN_SECS)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    /// Same interval with its start moved to `start`.
    pub fn with_start(&self, start: f64) -> Result<Self, IntervalError> {
        Self::new(start, self.end)
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// True when the two half-open intervals share any time.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when `t` lies in `[start, end)`.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

/// Merge intervals whose gap to the previous one is below `max_gap`.
///
/// Overlapping intervals always merge. The output is sorted by start and
/// pairwise separated by at least `max_gap`, so merging it again is a no-op.
pub fn merge_adjacent(intervals: &[TimeInterval], max_gap: f64) -> Vec<TimeInterval> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<TimeInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(last) if interval.start - last.end < max_gap => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: f64, end: f64) -> TimeInterval {
        TimeInterval::new(start, end).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_bounds() {
        assert!(matches!(
            TimeInterval::new(2.0, 2.0),
            Err(IntervalError::Empty { .. })
        ));
        assert!(matches!(
            TimeInterval::new(-1.0, 2.0),
            Err(IntervalError::NegativeStart(_))
        ));
        assert!(matches!(
            TimeInterval::new(0.0, f64::NAN),
            Err(IntervalError::NotFinite { .. })
        ));
        assert!(TimeInterval::new(0.0, 0.5).is_ok());
    }

    #[test]
    fn test_overlap_is_half_open() {
        let a = iv(0.0, 5.0);
        assert!(a.overlaps(&iv(4.9, 6.0)));
        assert!(!a.overlaps(&iv(5.0, 6.0)));
        assert!(a.contains(0.0));
        assert!(!a.contains(5.0));
    }

    #[test]
    fn test_merge_adjacent_collapses_small_gaps() {
        let raw = vec![iv(3.0, 4.0), iv(0.0, 1.0), iv(1.2, 2.0), iv(1.5, 1.8)];
        let merged = merge_adjacent(&raw, 0.5);
        assert_eq!(merged, vec![iv(0.0, 2.0), iv(3.0, 4.0)]);
    }

    #[test]
    fn test_merge_keeps_longest_end_when_nested() {
        let merged = merge_adjacent(&[iv(0.0, 10.0), iv(1.0, 2.0)], 0.5);
        assert_eq!(merged, vec![iv(0.0, 10.0)]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let raw = vec![
            iv(0.0, 0.4),
            iv(0.6, 1.0),
            iv(1.49, 2.0),
            iv(2.5, 3.0),
            iv(2.8, 3.5),
            iv(7.0, 7.1),
        ];
        let once = merge_adjacent(&raw, 0.5);
        let twice = merge_adjacent(&once, 0.5);
        assert_eq!(once, twice);
        for pair in once.windows(2) {
            assert!(pair[0].end <= pair[1].start);
            assert!(pair[0].start < pair[0].end);
        }
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_adjacent(&[], 0.5).is_empty());
    }

    #[test]
    fn test_deserialize_validates_bounds() {
        let parsed: TimeInterval = serde_json::from_str(r#"{"start": 1.5, "end": 4.0}"#).unwrap();
        assert_eq!((parsed.start(), parsed.end()), (1.5, 4.0));
        assert_eq!(serde_json::to_value(parsed).unwrap()["end"], 4.0);

        assert!(serde_json::from_str::<TimeInterval>(r#"{"start": 4.0, "end": 1.5}"#).is_err());
        assert!(serde_json::from_str::<TimeInterval>(r#"{"start": -1.0, "end": 1.5}"#).is_err());
    }

    #[test]
    fn test_with_start_revalidates() {
        let moved = iv(2.0, 10.0).with_start(4.0).unwrap();
        assert_eq!((moved.start(), moved.end()), (4.0, 10.0));
        assert!(iv(2.0, 10.0).with_start(10.0).is_err());
    }
}
