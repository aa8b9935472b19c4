// ABOUTME: Ride classification heuristics for the climbing-event leaderboard
// ABOUTME: Hugel-potential tiers, event-date window, and detail-fetch priority
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Activity Classification
//!
//! Cheap string/threshold heuristics applied to every summary that comes off
//! a sync page. They decide which activities get a detail fetch, at what
//! priority, and which ones matter during the yearly event window when the
//! quota is under the most pressure.

use crate::models::{distance_to_feet, distance_to_miles, ActivitySummary};
use crate::queue::Priority;
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// The fixed multi-day yearly event window.
///
/// Membership checks use the activity's local start date so a ride is judged
/// by the calendar the athlete saw, not by UTC.
#[derive(Debug, Clone, Copy)]
pub struct EventWindow {
    /// First day of the event (inclusive).
    pub start: NaiveDate,
    /// Number of event days.
    pub days: u32,
}

impl EventWindow {
    /// Does `t` fall inside the window?
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let date = t.date_naive();
        date >= self.start && date < self.start + Duration::days(i64::from(self.days))
    }
}

/// Covers the weird stuff like "VirtualRide", "EBikeRide", "MountainBikeRide".
#[must_use]
pub fn is_bike_ride(activity_type: &str) -> bool {
    let lowered = activity_type.to_lowercase();
    lowered.contains("bike") || lowered.contains("ride")
}

/// Full hugel-potential tier: long and steep enough to plausibly be the event
/// route.
#[must_use]
pub fn can_be_hugel(summary: &ActivitySummary) -> bool {
    distance_to_miles(summary.distance) > 80.0
        && distance_to_feet(summary.total_elevation_gain) > 8000.0
}

/// Lite tier for the shorter event route.
#[must_use]
pub fn can_be_hugel_lite(summary: &ActivitySummary) -> bool {
    distance_to_miles(summary.distance) > 35.0
        && distance_to_feet(summary.total_elevation_gain) > 3500.0
}

/// Did the ride start on one of the event dates?
#[must_use]
pub fn on_event_dates(summary: &ActivitySummary, window: EventWindow) -> bool {
    window.contains(summary.start_date_local)
}

/// Priority for the detail fetch of a freshly listed ride.
///
/// Recent rides get bumped so webhook-adjacent work stays fresh; recent big
/// rides jump the queue entirely.
#[must_use]
pub fn detail_fetch_priority(summary: &ActivitySummary, now: DateTime<Utc>) -> Priority {
    let age = now - summary.start_date;

    if distance_to_miles(summary.distance) > 80.0
        && distance_to_feet(summary.total_elevation_gain) > 7000.0
        && age < Duration::days(14)
    {
        return Priority::High;
    }

    if age < Duration::days(7) {
        return Priority::Default;
    }

    Priority::Low
}

#[cfg(test)]
mod tests {
    use super::{
        can_be_hugel, can_be_hugel_lite, detail_fetch_priority, is_bike_ride, on_event_dates,
        EventWindow,
    };
    use crate::models::ActivitySummary;
    use crate::queue::Priority;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

    fn summary(distance_m: f64, climb_m: f64, start: DateTime<Utc>) -> ActivitySummary {
        ActivitySummary {
            id: 1,
            athlete_id: 2,
            name: "ride".into(),
            distance: distance_m,
            moving_time: 3600,
            elapsed_time: 3700,
            total_elevation_gain: climb_m,
            activity_type: "Ride".into(),
            sport_type: "Ride".into(),
            start_date: start,
            start_date_local: start,
            timezone: "America/Chicago".into(),
            map_id: "m1".into(),
            trainer: false,
            commute: false,
            manual: false,
            private: false,
            average_speed: 7.5,
            max_speed: 18.0,
            device_watts: false,
            has_heartrate: false,
            pr_count: 0,
            download_count: 0,
        }
    }

    #[test]
    fn ride_type_tokens() {
        assert!(is_bike_ride("Ride"));
        assert!(is_bike_ride("VirtualRide"));
        assert!(is_bike_ride("EBikeRide"));
        assert!(is_bike_ride("MountainBikeRide"));
        assert!(!is_bike_ride("Run"));
        assert!(!is_bike_ride("Hike"));
    }

    #[test]
    fn hugel_tiers() {
        let now = Utc::now();
        // 100 miles, 9000 ft.
        let big = summary(160_934.0, 2743.2, now);
        assert!(can_be_hugel(&big));
        assert!(can_be_hugel_lite(&big));

        // 40 miles, 4000 ft.
        let lite = summary(64_373.6, 1219.2, now);
        assert!(!can_be_hugel(&lite));
        assert!(can_be_hugel_lite(&lite));

        // 20 miles, flat.
        let small = summary(32_186.8, 100.0, now);
        assert!(!can_be_hugel(&small));
        assert!(!can_be_hugel_lite(&small));
    }

    #[test]
    fn event_window_membership() {
        let window = EventWindow {
            start: NaiveDate::from_ymd_opt(2024, 11, 8).unwrap(),
            days: 4,
        };
        let during = Utc.with_ymd_and_hms(2024, 11, 9, 8, 0, 0).single().unwrap();
        let after = Utc.with_ymd_and_hms(2024, 11, 12, 8, 0, 0).single().unwrap();
        assert!(on_event_dates(&summary(1000.0, 10.0, during), window));
        assert!(!on_event_dates(&summary(1000.0, 10.0, after), window));
    }

    #[test]
    fn priority_tiers() {
        let now = Utc::now();
        let recent_big = summary(160_934.0, 2438.4, now - Duration::days(2));
        assert_eq!(detail_fetch_priority(&recent_big, now), Priority::High);

        let recent_small = summary(16_093.4, 100.0, now - Duration::days(2));
        assert_eq!(detail_fetch_priority(&recent_small, now), Priority::Default);

        let old = summary(160_934.0, 2438.4, now - Duration::days(30));
        assert_eq!(detail_fetch_priority(&old, now), Priority::Low);
    }
}
