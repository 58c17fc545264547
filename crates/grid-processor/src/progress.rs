//! Rate-limited progress reporting for long grid traversals.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

/// Outcome counters of one traversal.
///
/// Owned by the loop that updates it; parallel workers keep their own and
/// [`merge`](Self::merge) at the end.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressState {
    pub valid: usize,
    pub masked: usize,
    pub out_of_area: usize,
    pub unknown: usize,
    /// Cells outside the land mask.
    pub skipped: usize,
    /// Individual malformed source values seen inside otherwise valid regions.
    pub malformed_values: usize,
    pub total: usize,
    #[serde(skip)]
    last_report: Instant,
}

impl ProgressState {
    pub fn new(total: usize) -> Self {
        Self {
            valid: 0,
            masked: 0,
            out_of_area: 0,
            unknown: 0,
            skipped: 0,
            malformed_values: 0,
            total,
            last_report: Instant::now(),
        }
    }

    /// Cells processed so far.
    pub fn complete(&self) -> usize {
        self.valid + self.masked + self.out_of_area + self.unknown + self.skipped
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.complete())
    }

    pub fn merge(&mut self, other: &ProgressState) {
        self.valid += other.valid;
        self.masked += other.masked;
        self.out_of_area += other.out_of_area;
        self.unknown += other.unknown;
        self.skipped += other.skipped;
        self.malformed_values += other.malformed_values;
        self.total += other.total;
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PartialEq for ProgressState {
    fn eq(&self, other: &Self) -> bool {
        self.valid == other.valid
            && self.masked == other.masked
            && self.out_of_area == other.out_of_area
            && self.unknown == other.unknown
            && self.skipped == other.skipped
            && self.malformed_values == other.malformed_values
            && self.total == other.total
    }
}

/// Snapshot emitted by [`ProgressTracker::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    pub complete: usize,
    pub remaining: usize,
    pub valid: usize,
    pub masked: usize,
    pub unknown: usize,
}

impl From<&ProgressState> for ProgressReport {
    fn from(state: &ProgressState) -> Self {
        Self {
            complete: state.complete(),
            remaining: state.remaining(),
            valid: state.valid,
            masked: state.masked,
            unknown: state.unknown,
        }
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Complete: {}\tRemaining: {}\tValid: {}\tMasked: {}\tUnknown: {}",
            format_thousands(self.complete),
            format_thousands(self.remaining),
            format_thousands(self.valid),
            format_thousands(self.masked),
            format_thousands(self.unknown),
        )
    }
}

/// Emits a report at most once per interval.
#[derive(Debug, Clone, Copy)]
pub struct ProgressTracker {
    interval: Duration,
}

impl ProgressTracker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Log and return a report if the interval has elapsed since the last one.
    pub fn tick(&self, state: &mut ProgressState) -> Option<ProgressReport> {
        self.tick_at(state, Instant::now())
    }

    fn tick_at(&self, state: &mut ProgressState, now: Instant) -> Option<ProgressReport> {
        if now.saturating_duration_since(state.last_report) < self.interval {
            return None;
        }
        state.last_report = now;

        let report = ProgressReport::from(&*state);
        info!(
            complete = report.complete,
            remaining = report.remaining,
            valid = report.valid,
            masked = report.masked,
            unknown = report.unknown,
            "{}",
            report
        );
        Some(report)
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// `1234567` → `"1,234,567"`.
pub fn format_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_thousands() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1000), "1,000");
        assert_eq!(format_thousands(170240), "170,240");
        assert_eq!(format_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_tick_respects_interval() {
        let tracker = ProgressTracker::new(Duration::from_secs(5));
        let mut state = ProgressState::new(100);
        let start = state.last_report;

        assert!(tracker.tick_at(&mut state, start + Duration::from_secs(1)).is_none());

        state.valid = 10;
        state.masked = 5;
        let report = tracker
            .tick_at(&mut state, start + Duration::from_secs(6))
            .unwrap();
        assert_eq!(report.complete, 15);
        assert_eq!(report.remaining, 85);

        // timer was reset by the report
        assert!(tracker.tick_at(&mut state, start + Duration::from_secs(8)).is_none());
        assert!(tracker.tick_at(&mut state, start + Duration::from_secs(11)).is_some());
    }

    #[test]
    fn test_report_display() {
        let report = ProgressReport {
            complete: 12000,
            remaining: 158240,
            valid: 9000,
            masked: 3000,
            unknown: 0,
        };
        assert_eq!(
            report.to_string(),
            "Complete: 12,000\tRemaining: 158,240\tValid: 9,000\tMasked: 3,000\tUnknown: 0"
        );
    }

    #[test]
    fn test_merge() {
        let mut a = ProgressState::new(10);
        a.valid = 4;
        a.skipped = 2;
        let mut b = ProgressState::new(20);
        b.masked = 3;
        b.out_of_area = 1;
        b.malformed_values = 7;

        a.merge(&b);
        assert_eq!(a.total, 30);
        assert_eq!(a.complete(), 10);
        assert_eq!(a.remaining(), 20);
        assert_eq!(a.malformed_values, 7);
    }
}
