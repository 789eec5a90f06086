//! Time window planner
//!
//! Splits a [`TimeRange`] into contiguous windows of a fixed number of
//! minutes. The last window is truncated at the range end.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{FetchError, Result};
use crate::query::TimeRange;

/// One window of a plan. `index` is zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub index: usize,
    range: TimeRange,
}

impl Window {
    pub fn start(&self) -> DateTime<Utc> {
        self.range.start()
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.range.end()
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }
}

/// Restartable, lazily evaluated sequence of windows.
#[derive(Debug, Clone)]
pub struct WindowPlan {
    range: TimeRange,
    interval: TimeDelta,
    total: usize,
    next: usize,
}

/// Plan `range` into windows of `interval_minutes`.
///
/// # Errors
/// * `InvalidConfig` when `interval_minutes` is zero
pub fn plan(range: TimeRange, interval_minutes: u32) -> Result<WindowPlan> {
    if interval_minutes == 0 {
        return Err(FetchError::invalid_config(
            "time_interval_minutes must be a positive integer",
        ));
    }
    let interval = TimeDelta::minutes(i64::from(interval_minutes));

    let duration = range.duration();
    let step = interval.num_seconds();
    let secs = duration.num_seconds();
    let mut total = secs / step;
    if secs % step != 0 || duration.subsec_nanos() != 0 {
        total += 1;
    }

    Ok(WindowPlan {
        range,
        interval,
        total: total as usize,
        next: 0,
    })
}

impl WindowPlan {
    /// A plan with exactly one window covering `range`.
    pub fn single(range: TimeRange) -> Self {
        Self {
            range,
            interval: range.duration(),
            total: 1,
            next: 0,
        }
    }

    /// Number of windows in the whole plan, consumed or not.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    /// Window `index` of the plan, independent of iteration state.
    pub fn window(&self, index: usize) -> Option<Window> {
        if index >= self.total {
            return None;
        }
        let offset = self.interval.checked_mul(i32::try_from(index).ok()?)?;
        self.range
            .subrange(offset, self.interval)
            .map(|range| Window { index, range })
    }

    /// Start over from the first window.
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

impl Iterator for WindowPlan {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let window = self.window(self.next)?;
        self.next += 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for WindowPlan {}
