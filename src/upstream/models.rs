// ABOUTME: Wire models for upstream API responses and their domain conversions
// ABOUTME: Deserializes listing, detail, and segment payloads into engine rows
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

use crate::models::{
    ActivityDetail, ActivityDetailBundle, ActivitySource, ActivitySummary, MapData, Segment,
    SegmentEffort, SegmentStar,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;

/// Bare athlete reference nested in most payloads.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AthleteRef {
    /// Upstream athlete id.
    pub id: i64,
}

/// Map reference; the polyline field is only present on detail fetches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MapRef {
    /// Upstream map id.
    #[serde(default)]
    pub id: String,
    /// Full polyline (detail only).
    #[serde(default)]
    pub polyline: Option<String>,
    /// Reduced polyline.
    #[serde(default)]
    pub summary_polyline: Option<String>,
}

impl MapRef {
    fn into_map_data(self) -> MapData {
        MapData {
            id: self.id,
            polyline: self.polyline.unwrap_or_default(),
            summary_polyline: self.summary_polyline.unwrap_or_default(),
        }
    }
}

/// One activity from the paginated listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityData {
    /// Upstream activity id.
    pub id: i64,
    /// Owning athlete.
    #[serde(default)]
    pub athlete: AthleteRef,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Meters.
    #[serde(default)]
    pub distance: f64,
    /// Seconds.
    #[serde(default)]
    pub moving_time: i64,
    /// Seconds.
    #[serde(default)]
    pub elapsed_time: i64,
    /// Meters.
    #[serde(default)]
    pub total_elevation_gain: f64,
    /// Legacy type string.
    #[serde(rename = "type", default)]
    pub activity_type: String,
    /// Newer sport type string.
    #[serde(default)]
    pub sport_type: String,
    /// Start instant.
    pub start_date: DateTime<Utc>,
    /// Start instant in athlete-local time.
    pub start_date_local: DateTime<Utc>,
    /// Olson timezone label.
    #[serde(default)]
    pub timezone: String,
    /// Map reference.
    #[serde(default)]
    pub map: MapRef,
    /// Trainer ride.
    #[serde(default)]
    pub trainer: bool,
    /// Commute.
    #[serde(default)]
    pub commute: bool,
    /// Manually entered.
    #[serde(default)]
    pub manual: bool,
    /// Private.
    #[serde(default)]
    pub private: bool,
    /// m/s.
    #[serde(default)]
    pub average_speed: f64,
    /// m/s.
    #[serde(default)]
    pub max_speed: f64,
    /// Power meter present.
    #[serde(default)]
    pub device_watts: bool,
    /// Heartrate stream present.
    #[serde(default)]
    pub has_heartrate: bool,
    /// PR count.
    #[serde(default)]
    pub pr_count: i32,
}

impl ActivityData {
    /// Split into the map and summary rows a listing page persists.
    #[must_use]
    pub fn into_rows(self) -> (MapData, ActivitySummary) {
        let map = self.map.clone().into_map_data();
        let summary = ActivitySummary {
            id: self.id,
            athlete_id: self.athlete.id,
            name: self.name,
            distance: self.distance,
            moving_time: self.moving_time,
            elapsed_time: self.elapsed_time,
            total_elevation_gain: self.total_elevation_gain,
            activity_type: self.activity_type,
            sport_type: self.sport_type,
            start_date: self.start_date,
            start_date_local: self.start_date_local,
            timezone: self.timezone,
            map_id: map.id.clone(),
            trainer: self.trainer,
            commute: self.commute,
            manual: self.manual,
            private: self.private,
            average_speed: self.average_speed,
            max_speed: self.max_speed,
            device_watts: self.device_watts,
            has_heartrate: self.has_heartrate,
            pr_count: self.pr_count,
            download_count: 0,
        };
        (map, summary)
    }
}

/// Segment fields nested in an effort payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EffortSegmentRef {
    /// Upstream segment id.
    pub id: i64,
    /// Segment name.
    #[serde(default)]
    pub name: String,
    /// Whether the athlete has starred this segment.
    #[serde(default)]
    pub starred: bool,
}

/// One timed segment effort on a detail payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentEffortData {
    /// Upstream effort id.
    pub id: i64,
    /// Athlete who rode it.
    #[serde(default)]
    pub athlete: AthleteRef,
    /// Segment it was timed on.
    #[serde(default)]
    pub segment: EffortSegmentRef,
    /// Effort name (usually the segment name).
    #[serde(default)]
    pub name: String,
    /// Seconds.
    #[serde(default)]
    pub elapsed_time: i64,
    /// Seconds.
    #[serde(default)]
    pub moving_time: i64,
    /// Start instant.
    pub start_date: DateTime<Utc>,
    /// Meters.
    #[serde(default)]
    pub distance: f64,
    /// Power meter present.
    #[serde(default)]
    pub device_watts: bool,
    /// Average power.
    #[serde(default)]
    pub average_watts: f64,
    /// KOM rank 1-10 if placed.
    #[serde(default)]
    pub kom_rank: Option<i32>,
    /// PR rank 1-3 if placed.
    #[serde(default)]
    pub pr_rank: Option<i32>,
}

/// Full activity detail, a superset of the listing row.
#[derive(Debug, Clone, Deserialize)]
pub struct DetailedActivityData {
    /// The summary-level fields.
    #[serde(flatten)]
    pub summary: ActivityData,
    /// Average cadence.
    #[serde(default)]
    pub average_cadence: f64,
    /// Average power.
    #[serde(default)]
    pub average_watts: f64,
    /// Weighted average power.
    #[serde(default)]
    pub weighted_average_watts: f64,
    /// Max power.
    #[serde(default)]
    pub max_watts: f64,
    /// Kilojoules.
    #[serde(default)]
    pub kilojoules: f64,
    /// Meters.
    #[serde(default)]
    pub elev_high: f64,
    /// Meters.
    #[serde(default)]
    pub elev_low: f64,
    /// Calories.
    #[serde(default)]
    pub calories: f64,
    /// Every timed segment effort.
    #[serde(default)]
    pub segment_efforts: Vec<SegmentEffortData>,
}

impl DetailedActivityData {
    /// Build the single-transaction persist bundle for this detail.
    ///
    /// Star rows are deduplicated here: an activity can ride the same segment
    /// several times, but only one star row per unique segment is written.
    #[must_use]
    pub fn into_bundle(self, source: ActivitySource, premium_fetch: bool) -> ActivityDetailBundle {
        let (map, summary) = self.summary.into_rows();
        let activity_id = summary.id;
        let athlete_id = summary.athlete_id;

        let mut stars = Vec::with_capacity(self.segment_efforts.len());
        let mut starred_segments: HashSet<i64> = HashSet::new();
        let mut efforts = Vec::with_capacity(self.segment_efforts.len());

        for effort in self.segment_efforts {
            if starred_segments.insert(effort.segment.id) {
                stars.push(SegmentStar {
                    athlete_id: effort.athlete.id,
                    segment_id: effort.segment.id,
                    starred: effort.segment.starred,
                });
            }
            efforts.push(SegmentEffort {
                id: effort.id,
                athlete_id: effort.athlete.id,
                segment_id: effort.segment.id,
                activity_id,
                name: effort.name,
                elapsed_time: effort.elapsed_time,
                moving_time: effort.moving_time,
                start_date: effort.start_date,
                distance: effort.distance,
                device_watts: effort.device_watts,
                average_watts: effort.average_watts,
                kom_rank: effort.kom_rank,
                pr_rank: effort.pr_rank,
            });
        }

        let detail = ActivityDetail {
            id: activity_id,
            athlete_id,
            map_id: map.id.clone(),
            average_cadence: self.average_cadence,
            average_watts: self.average_watts,
            weighted_average_watts: self.weighted_average_watts,
            max_watts: self.max_watts,
            kilojoules: self.kilojoules,
            elev_high: self.elev_high,
            elev_low: self.elev_low,
            calories: self.calories,
            premium_fetch,
            num_segment_efforts: i32::try_from(efforts.len()).unwrap_or(i32::MAX),
            source,
            updated_at: Utc::now(),
        };

        ActivityDetailBundle {
            map,
            summary,
            detail,
            efforts,
            stars,
        }
    }
}

/// Segment detail payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentData {
    /// Upstream segment id.
    pub id: i64,
    /// Name.
    #[serde(default)]
    pub name: String,
    /// Activity type the segment is defined for.
    #[serde(default)]
    pub activity_type: String,
    /// Meters.
    #[serde(default)]
    pub distance: f64,
    /// Percent.
    #[serde(default)]
    pub average_grade: f64,
    /// Percent.
    #[serde(default)]
    pub maximum_grade: f64,
    /// Meters.
    #[serde(default)]
    pub elevation_high: f64,
    /// Meters.
    #[serde(default)]
    pub elevation_low: f64,
    /// Meters.
    #[serde(default)]
    pub total_elevation_gain: f64,
    /// Category 0-5.
    #[serde(default)]
    pub climb_category: i32,
    /// City, if known.
    #[serde(default)]
    pub city: String,
    /// Hazardous flag.
    #[serde(default)]
    pub hazardous: bool,
    /// Map reference.
    #[serde(default)]
    pub map: MapRef,
    /// Total efforts upstream.
    #[serde(default)]
    pub effort_count: i32,
    /// Total stars upstream.
    #[serde(default)]
    pub star_count: i32,
}

impl SegmentData {
    /// Split into the map and segment rows the loader persists.
    #[must_use]
    pub fn into_rows(self) -> (MapData, Segment) {
        let map = self.map.clone().into_map_data();
        let segment = Segment {
            id: self.id,
            name: self.name,
            activity_type: self.activity_type,
            distance: self.distance,
            average_grade: self.average_grade,
            maximum_grade: self.maximum_grade,
            elevation_high: self.elevation_high,
            elevation_low: self.elevation_low,
            total_elevation_gain: self.total_elevation_gain,
            climb_category: self.climb_category,
            city: self.city,
            hazardous: self.hazardous,
            map_id: map.id.clone(),
            total_effort_count: self.effort_count,
            total_star_count: self.star_count,
        };
        (map, segment)
    }
}
