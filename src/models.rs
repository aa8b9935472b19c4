// ABOUTME: Domain models for athletes, activities, segments, and sync cursors
// ABOUTME: Common data structures persisted through the Store trait
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Domain Models
//!
//! Rows owned by the sync engine. Everything here is keyed by the upstream
//! platform's numeric ids (athletes, activities, segments, efforts) so that
//! repeated syncs of the same object are natural upserts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Meters per mile.
const METERS_PER_MILE: f64 = 1609.34;

/// Feet per meter.
const FEET_PER_METER: f64 = 3.280_84;

/// Convert an upstream distance (meters) to miles.
#[must_use]
pub fn distance_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

/// Convert an upstream elevation (meters) to feet.
#[must_use]
pub fn distance_to_feet(meters: f64) -> f64 {
    meters * FEET_PER_METER
}

/// Where a detail fetch originated. Drives the admission discount, the
/// duplicate-fetch guard, and the seasonal gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    /// Real-time webhook delivery.
    Webhook,
    /// Historical page walk (forward or back load).
    Backload,
    /// Admin-triggered refresh.
    Manual,
    /// Re-fetch after an empty segment-effort list.
    ZeroSegmentRefetch,
    /// Source lost (older jobs without the field).
    Unknown,
}

impl ActivitySource {
    /// Sources that may always refetch a recently downloaded activity.
    #[must_use]
    pub const fn always_refetches(self) -> bool {
        matches!(self, Self::Manual | Self::ZeroSegmentRefetch)
    }
}

/// Stored credential for an athlete who completed the OAuth flow.
///
/// Token exchange/refresh mechanics live outside this crate; the engine only
/// reads the bearer token and deletes the row on upstream revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthleteLogin {
    /// Upstream athlete id.
    pub athlete_id: i64,
    /// Bearer token for API calls on this athlete's behalf.
    pub access_token: String,
    /// Whether the athlete has a premium subscription upstream.
    pub summit: bool,
}

/// Route polyline data shared by activities and segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapData {
    /// Upstream map id.
    pub id: String,
    /// Full-resolution polyline, present only on detail fetches.
    pub polyline: String,
    /// Reduced polyline, present on summaries.
    pub summary_polyline: String,
}

/// One activity as returned by the paginated listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySummary {
    /// Upstream activity id.
    pub id: i64,
    /// Owning athlete.
    pub athlete_id: i64,
    /// Display name.
    pub name: String,
    /// Distance in meters.
    pub distance: f64,
    /// Moving time in seconds.
    pub moving_time: i64,
    /// Elapsed time in seconds.
    pub elapsed_time: i64,
    /// Total climb in meters.
    pub total_elevation_gain: f64,
    /// Legacy activity type string ("Ride", "VirtualRide", ...).
    pub activity_type: String,
    /// Newer sport type string ("MountainBikeRide", ...).
    pub sport_type: String,
    /// Start instant (UTC).
    pub start_date: DateTime<Utc>,
    /// Start instant in the athlete's local timezone.
    pub start_date_local: DateTime<Utc>,
    /// Olson timezone name as reported upstream.
    pub timezone: String,
    /// Map reference.
    pub map_id: String,
    /// Indoor trainer ride.
    pub trainer: bool,
    /// Commute flag.
    pub commute: bool,
    /// Manually entered (no device recording).
    pub manual: bool,
    /// Private activity.
    pub private: bool,
    /// Average speed in m/s.
    pub average_speed: f64,
    /// Max speed in m/s.
    pub max_speed: f64,
    /// Device-reported power present.
    pub device_watts: bool,
    /// Heartrate stream present.
    pub has_heartrate: bool,
    /// Personal record count.
    pub pr_count: i32,
    /// How many times the detail endpoint was fetched for this activity.
    pub download_count: i32,
}

/// Detail-endpoint fields persisted alongside the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDetail {
    /// Upstream activity id.
    pub id: i64,
    /// Owning athlete.
    pub athlete_id: i64,
    /// Map reference (detail fetch carries the full polyline).
    pub map_id: String,
    /// Average cadence, if recorded.
    pub average_cadence: f64,
    /// Average power, if recorded.
    pub average_watts: f64,
    /// Normalized-style weighted power.
    pub weighted_average_watts: f64,
    /// Max power.
    pub max_watts: f64,
    /// Work in kilojoules.
    pub kilojoules: f64,
    /// Highest elevation in meters.
    pub elev_high: f64,
    /// Lowest elevation in meters.
    pub elev_low: f64,
    /// Calories burned.
    pub calories: f64,
    /// Whether the owning athlete had premium access at fetch time.
    pub premium_fetch: bool,
    /// Number of segment efforts returned with the detail.
    pub num_segment_efforts: i32,
    /// Where this fetch originated.
    pub source: ActivitySource,
    /// When the detail row was last written.
    pub updated_at: DateTime<Utc>,
}

/// A timed performance record for one athlete on one named segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentEffort {
    /// Upstream effort id.
    pub id: i64,
    /// Athlete who rode the effort.
    pub athlete_id: i64,
    /// Segment the effort was timed on.
    pub segment_id: i64,
    /// Activity the effort belongs to.
    pub activity_id: i64,
    /// Segment name at fetch time.
    pub name: String,
    /// Elapsed seconds.
    pub elapsed_time: i64,
    /// Moving seconds.
    pub moving_time: i64,
    /// Start instant (UTC).
    pub start_date: DateTime<Utc>,
    /// Effort distance in meters.
    pub distance: f64,
    /// Device power present.
    pub device_watts: bool,
    /// Average power.
    pub average_watts: f64,
    /// KOM rank 1-10 if placed.
    pub kom_rank: Option<i32>,
    /// PR rank 1-3 if placed.
    pub pr_rank: Option<i32>,
}

/// Whether the athlete has starred a segment, deduplicated per segment when
/// persisting an activity's efforts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStar {
    /// Athlete owning the star state.
    pub athlete_id: i64,
    /// Segment the state applies to.
    pub segment_id: i64,
    /// Starred or not.
    pub starred: bool,
}

/// A named competitive segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Upstream segment id.
    pub id: i64,
    /// Segment name.
    pub name: String,
    /// Activity type the segment is defined for.
    pub activity_type: String,
    /// Length in meters.
    pub distance: f64,
    /// Average grade percent.
    pub average_grade: f64,
    /// Max grade percent.
    pub maximum_grade: f64,
    /// Highest elevation in meters.
    pub elevation_high: f64,
    /// Lowest elevation in meters.
    pub elevation_low: f64,
    /// Total climb in meters.
    pub total_elevation_gain: f64,
    /// Climb category 0-5.
    pub climb_category: i32,
    /// City, if known.
    pub city: String,
    /// Hazardous flag upstream.
    pub hazardous: bool,
    /// Map reference.
    pub map_id: String,
    /// Total effort count upstream.
    pub total_effort_count: i32,
    /// Total athlete count upstream.
    pub total_star_count: i32,
}

/// Per-athlete forward-load pagination state.
///
/// `activity_time_after` is the watermark: every fetched page asks for
/// activities strictly after it, and it only ever moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Athlete this cursor belongs to.
    pub athlete_id: i64,
    /// Monotone non-decreasing watermark of the newest ingested start date.
    pub activity_time_after: DateTime<Utc>,
    /// True once a page came back empty (caught up).
    pub last_load_complete: bool,
    /// Earliest instant the next load may run.
    pub next_load_not_before: DateTime<Utc>,
    /// Last time any load touched this cursor.
    pub last_touched: DateTime<Utc>,
}

impl SyncCursor {
    /// Seed a cursor for an athlete that has never synced. The watermark
    /// starts in the far past so the first page covers all history.
    #[must_use]
    pub fn seed(athlete_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            athlete_id,
            activity_time_after: far_past(),
            last_load_complete: false,
            next_load_not_before: now,
            last_touched: now,
        }
    }

    /// Advance the watermark, keeping it monotone non-decreasing.
    pub fn advance_watermark(&mut self, observed: DateTime<Utc>) {
        if observed > self.activity_time_after {
            self.activity_time_after = observed;
        }
    }
}

/// Per-athlete back-load pagination state (legacy path).
///
/// Tracks two directions at once: `earliest_activity` walks history backwards
/// until exhausted, then `newest_activity_start` picks up new activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackloadCursor {
    /// Athlete this cursor belongs to.
    pub athlete_id: i64,
    /// Start date of the newest activity already ingested.
    pub newest_activity_start: DateTime<Utc>,
    /// Start date of the earliest activity seen so far.
    pub earliest_activity: DateTime<Utc>,
    /// Id of that earliest activity.
    pub earliest_activity_id: i64,
    /// True once the history walk hit an empty page.
    pub earliest_done: bool,
    /// True when more pages likely remain for this athlete.
    pub last_load_incomplete: bool,
    /// Error text of the last failed attempt, if any.
    pub last_error: Option<String>,
    /// Earliest instant the next load may run.
    pub next_load_not_before: DateTime<Utc>,
    /// Last time any load touched this cursor.
    pub last_touched: DateTime<Utc>,
}

impl BackloadCursor {
    /// Seed a backload cursor for an athlete that has never synced.
    #[must_use]
    pub fn seed(athlete_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            athlete_id,
            newest_activity_start: far_past(),
            earliest_activity: now,
            earliest_activity_id: 0,
            earliest_done: false,
            last_load_incomplete: false,
            last_error: None,
            next_load_not_before: now,
            last_touched: now,
        }
    }
}

/// A watermark value safely before any real activity.
fn far_past() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(631_152_000, 0).unwrap_or_else(Utc::now)
}

/// Inbound platform event as delivered to the webhook receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// "activity" or "athlete".
    pub object_type: ObjectType,
    /// "create", "update", or "delete".
    pub aspect_type: AspectType,
    /// Id of the object the event concerns.
    pub object_id: i64,
    /// Athlete who owns the object.
    pub owner_id: i64,
    /// Changed-field name to new string value.
    #[serde(default)]
    pub updates: HashMap<String, String>,
    /// Delivery timestamp (unix seconds).
    #[serde(default)]
    pub event_time: i64,
}

/// Webhook object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    /// An activity-level event.
    Activity,
    /// An athlete-level event.
    Athlete,
    /// Anything this engine does not know about.
    #[serde(other)]
    Unknown,
}

/// Webhook aspect kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectType {
    /// Object created upstream.
    Create,
    /// Object mutated upstream.
    Update,
    /// Object removed upstream.
    Delete,
    /// Anything this engine does not know about.
    #[serde(other)]
    Unknown,
}

/// Everything a detail fetch persists in one transaction.
#[derive(Debug, Clone)]
pub struct ActivityDetailBundle {
    /// Route map with full polyline.
    pub map: MapData,
    /// Refreshed summary row.
    pub summary: ActivitySummary,
    /// Detail row.
    pub detail: ActivityDetail,
    /// Every segment effort on the activity.
    pub efforts: Vec<SegmentEffort>,
    /// Star state, one row per unique segment touched.
    pub stars: Vec<SegmentStar>,
}

/// One page of summaries plus the cursor update, persisted in one transaction.
#[derive(Debug, Clone)]
pub struct SyncPageBundle {
    /// Map/summary pairs in page order.
    pub rows: Vec<(MapData, ActivitySummary)>,
    /// Cursor state after this page.
    pub cursor: SyncCursor,
}

/// Backload flavor of [`SyncPageBundle`].
#[derive(Debug, Clone)]
pub struct BackloadPageBundle {
    /// Map/summary pairs in page order.
    pub rows: Vec<(MapData, ActivitySummary)>,
    /// Cursor state after this page.
    pub cursor: BackloadCursor,
}

#[cfg(test)]
mod tests {
    use super::{distance_to_feet, distance_to_miles, SyncCursor};
    use chrono::{TimeZone, Utc};

    #[test]
    fn unit_conversions() {
        assert!((distance_to_miles(1609.34) - 1.0).abs() < 1e-9);
        assert!((distance_to_feet(1.0) - 3.280_84).abs() < 1e-9);
    }

    #[test]
    fn watermark_never_regresses() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().unwrap();
        let mut cursor = SyncCursor::seed(7, now);
        let newer = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).single().unwrap();
        cursor.advance_watermark(newer);
        assert_eq!(cursor.activity_time_after, newer);

        let older = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).single().unwrap();
        cursor.advance_watermark(older);
        assert_eq!(cursor.activity_time_after, newer, "watermark must not move back");
    }
}
