//! Hourly call budgeting for agent invocations.
//!
//! The limiter tracks how many agent calls were made within the current hour
//! bucket (`YYYY-MM-DD-HH`). The counter is file-backed so a restarted
//! process keeps honoring the budget; a missing or corrupt counter file is
//! treated as zero calls made.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::storage;
use crate::testing::ProgressDisplay;

/// Filename of the persisted counter.
pub const COUNTER_FILENAME: &str = "rate_counter.json";

/// Interval between wait-progress reports, in seconds.
const WAIT_REPORT_SECS: u64 = 10;

/// Persisted call counter for one hour window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitCounter {
    /// Calls made within the current window.
    pub calls_made_this_hour: u32,
    /// Hour bucket the count belongs to, formatted `YYYY-MM-DD-HH`.
    pub window_bucket: String,
}

impl RateLimitCounter {
    fn empty(bucket: String) -> Self {
        Self {
            calls_made_this_hour: 0,
            window_bucket: bucket,
        }
    }
}

/// Formats the hour bucket for a timestamp.
#[must_use]
pub fn hour_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H").to_string()
}

/// Start of the next hour after `at`.
#[must_use]
pub fn next_window_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = at
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at);
    truncated + chrono::Duration::hours(1)
}

/// Tracks and persists the hourly call budget.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls_per_hour: u32,
    counter: RateLimitCounter,
    counter_path: PathBuf,
}

impl RateLimiter {
    /// Loads the limiter from the state directory, starting at zero when no
    /// valid counter file exists.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected I/O failures.
    pub fn load<P: AsRef<Path>>(state_dir: P, max_calls_per_hour: u32) -> Result<Self> {
        let counter_path = state_dir.as_ref().join(COUNTER_FILENAME);
        let counter = storage::load_json(&counter_path)?
            .unwrap_or_else(|| RateLimitCounter::empty(hour_bucket(Utc::now())));
        Ok(Self {
            max_calls_per_hour,
            counter,
            counter_path,
        })
    }

    /// True iff another call fits in the current window.
    #[must_use]
    pub fn can_make_call(&self) -> bool {
        self.counter.calls_made_this_hour < self.max_calls_per_hour
    }

    /// Calls made in the current window.
    #[must_use]
    pub fn calls_made(&self) -> u32 {
        self.counter.calls_made_this_hour
    }

    /// Configured hourly budget.
    #[must_use]
    pub fn max_calls(&self) -> u32 {
        self.max_calls_per_hour
    }

    /// Records one call and persists the counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be written.
    pub fn record_call(&mut self) -> Result<u32> {
        self.counter.calls_made_this_hour += 1;
        storage::save_json(&self.counter_path, &self.counter)?;
        debug!(
            "Recorded agent call {}/{} in window {}",
            self.counter.calls_made_this_hour, self.max_calls_per_hour, self.counter.window_bucket
        );
        Ok(self.counter.calls_made_this_hour)
    }

    /// Zeroes the counter when the stored bucket is no longer current.
    ///
    /// Called at the start of every iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be written.
    pub fn reset_if_new_window(&mut self) -> Result<()> {
        self.reset_if_new_window_at(Utc::now())
    }

    fn reset_if_new_window_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        let current = hour_bucket(now);
        if self.counter.window_bucket != current {
            info!(
                "Rate window rolled over: {} -> {}",
                self.counter.window_bucket, current
            );
            self.counter = RateLimitCounter::empty(current);
            storage::save_json(&self.counter_path, &self.counter)?;
        }
        Ok(())
    }

    /// When the current window ends.
    #[must_use]
    pub fn next_reset(&self) -> DateTime<Utc> {
        next_window_start(Utc::now())
    }

    /// Waits until the next hour boundary, reporting progress to the
    /// display every ~10 seconds, then resets the counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset cannot be persisted.
    pub async fn wait_for_window_reset(&mut self, display: &dyn ProgressDisplay) -> Result<()> {
        let reset_at = self.next_reset();
        info!(
            "Hourly budget exhausted ({}/{}), waiting until {}",
            self.counter.calls_made_this_hour, self.max_calls_per_hour, reset_at
        );

        loop {
            let now = Utc::now();
            if now >= reset_at {
                break;
            }
            let remaining = (reset_at - now).num_seconds().max(0) as u64;
            display.wait_tick(remaining, "waiting for hourly rate window to reset");
            let sleep_secs = remaining.min(WAIT_REPORT_SECS);
            tokio::time::sleep(Duration::from_secs(sleep_secs.max(1))).await;
        }

        self.reset_if_new_window()?;
        display.status_line("rate window reset, resuming");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_hour_bucket_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 14, 35, 2).unwrap();
        assert_eq!(hour_bucket(at), "2026-03-07-14");
    }

    #[test]
    fn test_next_window_start() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 14, 35, 2).unwrap();
        let next = next_window_start(at);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 7, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_starts_at_zero_without_file() {
        let temp = TempDir::new().unwrap();
        let limiter = RateLimiter::load(temp.path(), 5).unwrap();
        assert_eq!(limiter.calls_made(), 0);
        assert!(limiter.can_make_call());
    }

    #[test]
    fn test_corrupt_counter_treated_as_zero() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(COUNTER_FILENAME), "garbage").unwrap();
        let limiter = RateLimiter::load(temp.path(), 5).unwrap();
        assert_eq!(limiter.calls_made(), 0);
    }

    #[test]
    fn test_record_call_persists() {
        let temp = TempDir::new().unwrap();
        let mut limiter = RateLimiter::load(temp.path(), 5).unwrap();
        assert_eq!(limiter.record_call().unwrap(), 1);
        assert_eq!(limiter.record_call().unwrap(), 2);

        let reloaded = RateLimiter::load(temp.path(), 5).unwrap();
        assert_eq!(reloaded.calls_made(), 2);
    }

    #[test]
    fn test_budget_exhaustion() {
        let temp = TempDir::new().unwrap();
        let mut limiter = RateLimiter::load(temp.path(), 2).unwrap();
        limiter.record_call().unwrap();
        assert!(limiter.can_make_call());
        limiter.record_call().unwrap();
        assert!(!limiter.can_make_call());
    }

    #[test]
    fn test_reset_on_new_window() {
        let temp = TempDir::new().unwrap();
        let mut limiter = RateLimiter::load(temp.path(), 5).unwrap();
        limiter.record_call().unwrap();
        limiter.record_call().unwrap();

        // Same window: no reset.
        limiter.reset_if_new_window().unwrap();
        assert_eq!(limiter.calls_made(), 2);

        // Force a stale bucket, then reset.
        limiter.counter.window_bucket = "2020-01-01-00".to_string();
        limiter.reset_if_new_window().unwrap();
        assert_eq!(limiter.calls_made(), 0);
        assert_eq!(limiter.counter.window_bucket, hour_bucket(Utc::now()));
    }

    #[test]
    fn test_reset_at_boundary() {
        let temp = TempDir::new().unwrap();
        let mut limiter = RateLimiter::load(temp.path(), 5).unwrap();
        limiter.counter.window_bucket = "2026-03-07-14".to_string();
        limiter.counter.calls_made_this_hour = 5;

        let boundary = Utc.with_ymd_and_hms(2026, 3, 7, 15, 0, 0).unwrap();
        limiter.reset_if_new_window_at(boundary).unwrap();
        assert_eq!(limiter.calls_made(), 0);
    }
}
