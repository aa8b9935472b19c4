// ABOUTME: Admission control for the shared upstream API quota
// ABOUTME: Tracks 15-minute and daily usage windows and answers "can N calls happen now"
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Rate Admission
//!
//! The upstream platform grants one shared quota per application: a short
//! 15-minute window and a daily window, reported back on every response. This
//! module tracks the last known usage of both windows and gates every batch of
//! external calls behind [`RateAdmission::admit`].
//!
//! The state is process-local and best-effort: refreshed from response
//! metadata, never persisted, and assuming a single active scheduler
//! instance per quota. Two instances sharing one quota would race past the
//! budget.
//!
//! An instance is injected into every worker and orchestrator rather than
//! living in a global, so tests get isolated limiters.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use std::sync::RwLock;

/// Seconds per short usage window.
const INTERVAL_SECONDS: i64 = 60 * 15;

/// Default short-window limit assumed until the first upstream update.
const DEFAULT_INTERVAL_LIMIT: i64 = 200;

/// Default daily limit assumed until the first upstream update.
const DEFAULT_DAILY_LIMIT: i64 = 1000;

/// Identifier of the 15-minute window containing `t`.
#[must_use]
pub fn interval_id(t: DateTime<Utc>) -> i64 {
    t.timestamp() / INTERVAL_SECONDS
}

/// Identifier of the daily window containing `t` (UTC day-of-year).
#[must_use]
pub fn day_id(t: DateTime<Utc>) -> i64 {
    i64::from(t.ordinal())
}

/// Time until the daily window resets at the next UTC midnight.
///
/// Call sites use this to shrink their safety buffers as the reset
/// approaches: with three hours left, burning into the remaining budget is
/// much safer than it is at noon.
#[must_use]
pub fn next_daily_reset(now: DateTime<Utc>) -> Duration {
    let midnight = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .unwrap_or(now)
        + Duration::days(1);
    midnight - now
}

#[derive(Debug)]
struct Windows {
    current_interval: i64,
    current_day: i64,
    interval_usage: i64,
    daily_usage: i64,
    interval_limit: i64,
    daily_limit: i64,
}

impl Windows {
    /// Reset usage when the window identifier has rolled over.
    fn roll(&mut self, now: DateTime<Utc>) {
        let interval = interval_id(now);
        if self.current_interval != interval {
            self.current_interval = interval;
            self.interval_usage = 0;
        }

        let day = day_id(now);
        if self.current_day != day {
            self.current_day = day;
            self.daily_usage = 0;
        }
    }
}

/// Process-local view of the shared upstream quota.
#[derive(Debug)]
pub struct RateAdmission {
    windows: RwLock<Windows>,
}

impl RateAdmission {
    /// New limiter with default limits, anchored to the current windows.
    #[must_use]
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// New limiter anchored to `now`; tests use this to control window rolls.
    #[must_use]
    pub fn anchored_at(now: DateTime<Utc>) -> Self {
        Self {
            windows: RwLock::new(Windows {
                current_interval: interval_id(now),
                current_day: day_id(now),
                interval_usage: 0,
                daily_usage: 0,
                interval_limit: DEFAULT_INTERVAL_LIMIT,
                daily_limit: DEFAULT_DAILY_LIMIT,
            }),
        }
    }

    /// Can `calls` more upstream calls happen right now while keeping
    /// `interval_budget` / `daily_budget` calls in reserve?
    #[must_use]
    pub fn admit(&self, calls: i64, interval_budget: i64, daily_budget: i64) -> bool {
        self.admit_at(Utc::now(), calls, interval_budget, daily_budget)
    }

    /// [`Self::admit`] with an explicit clock.
    #[must_use]
    pub fn admit_at(
        &self,
        now: DateTime<Utc>,
        calls: i64,
        interval_budget: i64,
        daily_budget: i64,
    ) -> bool {
        let (interval_left, daily_left) = self.remaining_at(now);
        interval_left >= interval_budget + calls && daily_left >= daily_budget + calls
    }

    /// Overwrite tracked usage/limits from upstream response metadata.
    pub fn update(
        &self,
        interval_usage: i64,
        interval_limit: i64,
        daily_usage: i64,
        daily_limit: i64,
    ) {
        self.update_at(Utc::now(), interval_usage, interval_limit, daily_usage, daily_limit);
    }

    /// [`Self::update`] with an explicit clock.
    pub fn update_at(
        &self,
        now: DateTime<Utc>,
        interval_usage: i64,
        interval_limit: i64,
        daily_usage: i64,
        daily_limit: i64,
    ) {
        if let Ok(mut windows) = self.windows.write() {
            windows.roll(now);
            windows.interval_usage = interval_usage;
            windows.daily_usage = daily_usage;
            windows.interval_limit = interval_limit;
            windows.daily_limit = daily_limit;
        }
    }

    /// Ingest the comma-pair usage/limit headers attached to upstream
    /// responses. Malformed values are ignored wholesale rather than
    /// half-applied.
    pub fn ingest_headers(&self, limit_header: Option<&str>, usage_header: Option<&str>) {
        let Some((interval_limit, daily_limit)) = limit_header.and_then(split_pair) else {
            return;
        };
        let Some((interval_usage, daily_usage)) = usage_header.and_then(split_pair) else {
            return;
        };
        self.update(interval_usage, interval_limit, daily_usage, daily_limit);
    }

    /// Remaining calls in the (interval, daily) windows.
    #[must_use]
    pub fn remaining(&self) -> (i64, i64) {
        self.remaining_at(Utc::now())
    }

    /// [`Self::remaining`] with an explicit clock.
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> (i64, i64) {
        self.windows.write().map_or((0, 0), |mut windows| {
            windows.roll(now);
            (
                windows.interval_limit - windows.interval_usage,
                windows.daily_limit - windows.daily_usage,
            )
        })
    }
}

impl Default for RateAdmission {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `"123, 456"` into `(123, 456)`.
fn split_pair(raw: &str) -> Option<(i64, i64)> {
    let (a, b) = raw.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Safety buffers that tighten as the daily reset approaches.
///
/// Each caller carries its own tiers: the forward loader reserves more than a
/// webhook-triggered detail fetch, and every tier shrinks near the end of the
/// quota day where a denied call costs at most a few hours of lag.
#[derive(Debug, Clone, Copy)]
pub struct BufferPolicy {
    /// Reserve for most of the day.
    pub base: (i64, i64),
    /// Reserve with under three hours to the daily reset.
    pub under_3h: (i64, i64),
    /// Reserve with under one hour to the daily reset.
    pub under_1h: (i64, i64),
    /// Reserve with under twenty minutes to the daily reset.
    pub under_20m: (i64, i64),
}

impl BufferPolicy {
    /// The (interval, daily) reserve to apply at `now`.
    #[must_use]
    pub fn buffers(&self, now: DateTime<Utc>) -> (i64, i64) {
        let left = next_daily_reset(now);
        if left < Duration::minutes(20) {
            self.under_20m
        } else if left < Duration::hours(1) {
            self.under_1h
        } else if left < Duration::hours(3) {
            self.under_3h
        } else {
            self.base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{day_id, interval_id, next_daily_reset, BufferPolicy, RateAdmission};
    use chrono::{Duration, TimeZone, Utc};

    fn noon() -> chrono::DateTime<chrono::Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn admit_boundary() {
        let now = noon();
        let admission = RateAdmission::anchored_at(now);
        // interval limit 200 (default); buffer 40.
        admission.update_at(now, 200 - 40 - 1, 200, 0, 1000);
        assert!(admission.admit_at(now, 1, 40, 0));

        admission.update_at(now, 200 - 40, 200, 0, 1000);
        assert!(!admission.admit_at(now, 1, 40, 0));
    }

    #[test]
    fn daily_window_gates_too() {
        let now = noon();
        let admission = RateAdmission::anchored_at(now);
        admission.update_at(now, 0, 200, 995, 1000);
        assert!(!admission.admit_at(now, 1, 0, 10));
        assert!(admission.admit_at(now, 1, 0, 4));
    }

    #[test]
    fn usage_resets_when_interval_rolls() {
        let now = noon();
        let admission = RateAdmission::anchored_at(now);
        admission.update_at(now, 199, 200, 500, 1000);
        assert_eq!(admission.remaining_at(now), (1, 500));

        let next_window = now + Duration::minutes(15);
        assert_ne!(interval_id(now), interval_id(next_window));
        assert_eq!(admission.remaining_at(next_window), (200, 500));
    }

    #[test]
    fn usage_resets_when_day_rolls() {
        let now = noon();
        let admission = RateAdmission::anchored_at(now);
        admission.update_at(now, 0, 200, 999, 1000);

        let tomorrow = now + Duration::days(1);
        assert_ne!(day_id(now), day_id(tomorrow));
        let (_, daily) = admission.remaining_at(tomorrow);
        assert_eq!(daily, 1000);
    }

    #[test]
    fn malformed_headers_ignored() {
        let now = noon();
        let admission = RateAdmission::anchored_at(now);
        admission.ingest_headers(Some("600,30000"), Some("not,numbers"));
        assert_eq!(admission.remaining_at(now), (200, 1000));

        admission.ingest_headers(Some("600,30000"), Some("10, 100"));
        assert_eq!(admission.remaining_at(now), (590, 29_900));
    }

    #[test]
    fn buffers_tighten_near_reset() {
        let policy = BufferPolicy {
            base: (150, 500),
            under_3h: (80, 300),
            under_1h: (50, 150),
            under_20m: (50, 100),
        };

        let midday = noon();
        assert_eq!(policy.buffers(midday), (150, 500));

        let late = Utc.with_ymd_and_hms(2024, 6, 15, 21, 30, 0).single().unwrap();
        assert_eq!(policy.buffers(late), (80, 300));

        let later = Utc.with_ymd_and_hms(2024, 6, 15, 23, 10, 0).single().unwrap();
        assert_eq!(policy.buffers(later), (50, 150));

        let last_call = Utc.with_ymd_and_hms(2024, 6, 15, 23, 50, 0).single().unwrap();
        assert_eq!(policy.buffers(last_call), (50, 100));
        assert_eq!(next_daily_reset(last_call), Duration::minutes(10));
    }
}
