// ABOUTME: In-memory collaborator implementations and builders for tests
// ABOUTME: MemoryStore honors bundle atomicity; ScriptedApi replays canned responses
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Test Utilities
//!
//! Trait doubles for the two external collaborators. [`MemoryStore`] is a
//! faithful little store: bundle methods are all-or-nothing, summary upserts
//! preserve the download counter, and a failure switch lets tests prove that
//! a failed transaction leaves zero writes behind. [`ScriptedApi`] replays
//! queued responses and records the requests it saw.

use crate::errors::AppResult;
use crate::models::{
    ActivityDetail, ActivityDetailBundle, ActivitySummary, AthleteLogin, BackloadCursor,
    BackloadPageBundle, MapData, Segment, SegmentEffort, SegmentStar, SyncCursor, SyncPageBundle,
};
use crate::store::Store;
use crate::upstream::models::{AthleteRef, MapRef};
use crate::upstream::{
    ActivityData, ApiError, DetailedActivityData, FitnessApi, ListParams, SegmentData,
    SegmentEffortData,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One audit row recorded by [`MemoryStore::insert_failed_job`].
#[derive(Debug, Clone)]
pub struct FailedJobRow {
    /// Job kind.
    pub kind: String,
    /// Serialized args.
    pub args: serde_json::Value,
    /// Error text.
    pub error: String,
}

#[derive(Debug, Default)]
struct StoreState {
    logins: HashMap<i64, AthleteLogin>,
    sync_cursors: HashMap<i64, SyncCursor>,
    backload_cursors: HashMap<i64, BackloadCursor>,
    maps: HashMap<String, MapData>,
    summaries: HashMap<i64, ActivitySummary>,
    details: HashMap<i64, ActivityDetail>,
    efforts: HashMap<i64, SegmentEffort>,
    stars: HashMap<(i64, i64), SegmentStar>,
    segments: HashMap<i64, Segment>,
    competitive: Vec<i64>,
    failed_jobs: Vec<FailedJobRow>,
    view_refreshes: HashMap<String, u32>,
    fail_next_persist: bool,
}

impl StoreState {
    fn upsert_summary(&mut self, summary: ActivitySummary) {
        let download_count = self
            .summaries
            .get(&summary.id)
            .map_or(0, |existing| existing.download_count);
        self.summaries.insert(
            summary.id,
            ActivitySummary {
                download_count,
                ..summary
            },
        );
    }
}

/// In-memory [`Store`] for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| anyhow!("store lock poisoned"))
    }

    /// Seed a logged-in athlete.
    pub fn add_login(&self, login: AthleteLogin) {
        if let Ok(mut state) = self.lock() {
            state.logins.insert(login.athlete_id, login);
        }
    }

    /// Seed the competitive-route segment list.
    pub fn add_competitive_segments(&self, ids: &[i64]) {
        if let Ok(mut state) = self.lock() {
            state.competitive.extend_from_slice(ids);
        }
    }

    /// Make the next `persist_*` bundle call fail after writing nothing.
    pub fn fail_next_persist(&self) {
        if let Ok(mut state) = self.lock() {
            state.fail_next_persist = true;
        }
    }

    /// Recorded audit rows.
    #[must_use]
    pub fn failed_jobs(&self) -> Vec<FailedJobRow> {
        self.lock().map(|state| state.failed_jobs.clone()).unwrap_or_default()
    }

    /// Summary row, if present.
    #[must_use]
    pub fn summary(&self, activity_id: i64) -> Option<ActivitySummary> {
        self.lock().ok()?.summaries.get(&activity_id).cloned()
    }

    /// Total rows across every table, for zero-write assertions.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.lock().map_or(0, |state| {
            state.maps.len()
                + state.summaries.len()
                + state.details.len()
                + state.efforts.len()
                + state.stars.len()
                + state.segments.len()
        })
    }

    /// Effort and star row counts.
    #[must_use]
    pub fn effort_and_star_counts(&self) -> (usize, usize) {
        self.lock()
            .map_or((0, 0), |state| (state.efforts.len(), state.stars.len()))
    }

    /// How many times a view refresh ran.
    #[must_use]
    pub fn refresh_count(&self, view: &str) -> u32 {
        self.lock()
            .map_or(0, |state| state.view_refreshes.get(view).copied().unwrap_or(0))
    }

    /// Loaded segment row, if present.
    #[must_use]
    pub fn segment(&self, segment_id: i64) -> Option<Segment> {
        self.lock().ok()?.segments.get(&segment_id).cloned()
    }

    fn bump_view(&self, view: &str) -> AppResult<()> {
        let mut state = self.lock()?;
        *state.view_refreshes.entry(view.to_owned()).or_insert(0) += 1;
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_athlete_login(&self, athlete_id: i64) -> AppResult<Option<AthleteLogin>> {
        Ok(self.lock()?.logins.get(&athlete_id).cloned())
    }

    async fn delete_athlete_login(&self, athlete_id: i64) -> AppResult<bool> {
        Ok(self.lock()?.logins.remove(&athlete_id).is_some())
    }

    async fn get_sync_cursor(&self, athlete_id: i64) -> AppResult<Option<SyncCursor>> {
        Ok(self.lock()?.sync_cursors.get(&athlete_id).cloned())
    }

    async fn upsert_sync_cursor(&self, cursor: SyncCursor) -> AppResult<SyncCursor> {
        self.lock()?.sync_cursors.insert(cursor.athlete_id, cursor.clone());
        Ok(cursor)
    }

    async fn get_backload_cursor(&self, athlete_id: i64) -> AppResult<Option<BackloadCursor>> {
        Ok(self.lock()?.backload_cursors.get(&athlete_id).cloned())
    }

    async fn upsert_backload_cursor(&self, cursor: BackloadCursor) -> AppResult<BackloadCursor> {
        self.lock()?
            .backload_cursors
            .insert(cursor.athlete_id, cursor.clone());
        Ok(cursor)
    }

    async fn athletes_needing_load(&self, now: DateTime<Utc>) -> AppResult<Vec<i64>> {
        let state = self.lock()?;
        Ok(state
            .logins
            .keys()
            .filter(|athlete_id| {
                state
                    .sync_cursors
                    .get(athlete_id)
                    .is_none_or(|cursor| cursor.next_load_not_before <= now)
            })
            .copied()
            .collect())
    }

    async fn get_activity_summary(&self, activity_id: i64) -> AppResult<Option<ActivitySummary>> {
        Ok(self.lock()?.summaries.get(&activity_id).cloned())
    }

    async fn get_activity_detail(&self, activity_id: i64) -> AppResult<Option<ActivityDetail>> {
        Ok(self.lock()?.details.get(&activity_id).cloned())
    }

    async fn persist_activity_detail(&self, bundle: ActivityDetailBundle) -> AppResult<()> {
        let mut state = self.lock()?;
        if state.fail_next_persist {
            state.fail_next_persist = false;
            return Err(anyhow!("injected transaction failure"));
        }

        state.maps.insert(bundle.map.id.clone(), bundle.map);
        state.upsert_summary(bundle.summary);
        let activity_id = bundle.detail.id;
        state.details.insert(activity_id, bundle.detail);
        if let Some(summary) = state.summaries.get_mut(&activity_id) {
            summary.download_count += 1;
        }
        for effort in bundle.efforts {
            state.efforts.insert(effort.id, effort);
        }
        for star in bundle.stars {
            state.stars.insert((star.athlete_id, star.segment_id), star);
        }
        Ok(())
    }

    async fn persist_sync_page(&self, bundle: SyncPageBundle) -> AppResult<()> {
        let mut state = self.lock()?;
        if state.fail_next_persist {
            state.fail_next_persist = false;
            return Err(anyhow!("injected transaction failure"));
        }

        for (map, summary) in bundle.rows {
            state.maps.insert(map.id.clone(), map);
            state.upsert_summary(summary);
        }
        state
            .sync_cursors
            .insert(bundle.cursor.athlete_id, bundle.cursor);
        Ok(())
    }

    async fn persist_backload_page(&self, bundle: BackloadPageBundle) -> AppResult<()> {
        let mut state = self.lock()?;
        if state.fail_next_persist {
            state.fail_next_persist = false;
            return Err(anyhow!("injected transaction failure"));
        }

        for (map, summary) in bundle.rows {
            state.maps.insert(map.id.clone(), map);
            state.upsert_summary(summary);
        }
        state
            .backload_cursors
            .insert(bundle.cursor.athlete_id, bundle.cursor);
        Ok(())
    }

    async fn update_activity_name(&self, activity_id: i64, name: &str) -> AppResult<bool> {
        let mut state = self.lock()?;
        Ok(state.summaries.get_mut(&activity_id).is_some_and(|summary| {
            summary.name = name.to_owned();
            true
        }))
    }

    async fn update_activity_sport(&self, activity_id: i64, sport_type: &str) -> AppResult<bool> {
        let mut state = self.lock()?;
        Ok(state.summaries.get_mut(&activity_id).is_some_and(|summary| {
            summary.sport_type = sport_type.to_owned();
            true
        }))
    }

    async fn delete_activity(&self, activity_id: i64) -> AppResult<bool> {
        Ok(self.lock()?.summaries.remove(&activity_id).is_some())
    }

    async fn competitive_segment_ids(&self) -> AppResult<Vec<i64>> {
        Ok(self.lock()?.competitive.clone())
    }

    async fn loaded_segment_ids(&self) -> AppResult<Vec<i64>> {
        Ok(self.lock()?.segments.keys().copied().collect())
    }

    async fn upsert_segment(&self, map: MapData, segment: Segment) -> AppResult<()> {
        let mut state = self.lock()?;
        state.maps.insert(map.id.clone(), map);
        state.segments.insert(segment.id, segment);
        Ok(())
    }

    async fn refresh_event_leaderboard(&self) -> AppResult<()> {
        self.bump_view("event")
    }

    async fn refresh_lite_leaderboard(&self) -> AppResult<()> {
        self.bump_view("lite")
    }

    async fn refresh_year_results(&self, year: i32) -> AppResult<()> {
        self.bump_view(&format!("year_{year}"))
    }

    async fn refresh_all_time_leaderboard(&self) -> AppResult<()> {
        self.bump_view("all_time")
    }

    async fn insert_failed_job(
        &self,
        kind: &str,
        args: serde_json::Value,
        error: &str,
    ) -> AppResult<()> {
        self.lock()?.failed_jobs.push(FailedJobRow {
            kind: kind.to_owned(),
            args,
            error: error.to_owned(),
        });
        Ok(())
    }

    async fn total_activity_details(&self) -> AppResult<i64> {
        Ok(i64::try_from(self.lock()?.details.len()).unwrap_or(i64::MAX))
    }

    async fn total_ride_summaries(&self) -> AppResult<i64> {
        Ok(i64::try_from(self.lock()?.summaries.len()).unwrap_or(i64::MAX))
    }
}

type ListScript = VecDeque<Result<Vec<ActivityData>, ApiError>>;
type DetailScript = HashMap<i64, VecDeque<Result<DetailedActivityData, ApiError>>>;
type SegmentScript = HashMap<i64, VecDeque<Result<SegmentData, ApiError>>>;

/// Scripted [`FitnessApi`] double.
#[derive(Default)]
pub struct ScriptedApi {
    list_responses: Mutex<ListScript>,
    detail_responses: Mutex<DetailScript>,
    segment_responses: Mutex<SegmentScript>,
    list_calls: Mutex<Vec<ListParams>>,
}

impl ScriptedApi {
    /// Empty script: listings return empty pages, lookups return 404.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next listing response.
    pub fn push_activities_page(&self, response: Result<Vec<ActivityData>, ApiError>) {
        if let Ok(mut responses) = self.list_responses.lock() {
            responses.push_back(response);
        }
    }

    /// Queue the next detail response for one activity.
    pub fn push_detail(&self, activity_id: i64, response: Result<DetailedActivityData, ApiError>) {
        if let Ok(mut responses) = self.detail_responses.lock() {
            responses.entry(activity_id).or_default().push_back(response);
        }
    }

    /// Queue the next segment response for one segment.
    pub fn push_segment(&self, segment_id: i64, response: Result<SegmentData, ApiError>) {
        if let Ok(mut responses) = self.segment_responses.lock() {
            responses.entry(segment_id).or_default().push_back(response);
        }
    }

    /// Every listing request seen so far.
    #[must_use]
    pub fn list_calls(&self) -> Vec<ListParams> {
        self.list_calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FitnessApi for ScriptedApi {
    async fn list_activities(
        &self,
        _access_token: &str,
        params: ListParams,
    ) -> Result<Vec<ActivityData>, ApiError> {
        if let Ok(mut calls) = self.list_calls.lock() {
            calls.push(params);
        }
        self.list_responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn get_activity(
        &self,
        _access_token: &str,
        activity_id: i64,
        _include_efforts: bool,
    ) -> Result<DetailedActivityData, ApiError> {
        self.detail_responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.get_mut(&activity_id)?.pop_front())
            .unwrap_or(Err(ApiError::Status {
                status: 404,
                body: "unscripted activity".into(),
            }))
    }

    async fn get_segment(
        &self,
        _access_token: &str,
        segment_id: i64,
    ) -> Result<SegmentData, ApiError> {
        self.segment_responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.get_mut(&segment_id)?.pop_front())
            .unwrap_or(Err(ApiError::Status {
                status: 404,
                body: "unscripted segment".into(),
            }))
    }
}

/// Login builder.
#[must_use]
pub fn login(athlete_id: i64) -> AthleteLogin {
    AthleteLogin {
        athlete_id,
        access_token: format!("token-{athlete_id}"),
        summit: false,
    }
}

/// Listing-row builder for a plain road ride.
#[must_use]
pub fn ride(activity_id: i64, athlete_id: i64, start: DateTime<Utc>) -> ActivityData {
    ActivityData {
        id: activity_id,
        athlete: AthleteRef { id: athlete_id },
        name: format!("Ride {activity_id}"),
        distance: 40_000.0,
        moving_time: 5400,
        elapsed_time: 5700,
        total_elevation_gain: 400.0,
        activity_type: "Ride".into(),
        sport_type: "Ride".into(),
        start_date: start,
        start_date_local: start,
        timezone: "America/Chicago".into(),
        map: MapRef {
            id: format!("a{activity_id}"),
            polyline: None,
            summary_polyline: Some("abc".into()),
        },
        trainer: false,
        commute: false,
        manual: false,
        private: false,
        average_speed: 7.4,
        max_speed: 18.0,
        device_watts: false,
        has_heartrate: false,
        pr_count: 0,
    }
}

/// Detail builder wrapping [`ride`] with the given efforts.
#[must_use]
pub fn ride_detail(
    activity_id: i64,
    athlete_id: i64,
    start: DateTime<Utc>,
    efforts: Vec<SegmentEffortData>,
) -> DetailedActivityData {
    DetailedActivityData {
        summary: ride(activity_id, athlete_id, start),
        average_cadence: 85.0,
        average_watts: 180.0,
        weighted_average_watts: 195.0,
        max_watts: 650.0,
        kilojoules: 1900.0,
        elev_high: 280.0,
        elev_low: 120.0,
        calories: 1800.0,
        segment_efforts: efforts,
    }
}

/// Effort builder.
#[must_use]
pub fn effort(
    effort_id: i64,
    athlete_id: i64,
    segment_id: i64,
    start: DateTime<Utc>,
) -> SegmentEffortData {
    use crate::upstream::models::EffortSegmentRef;
    SegmentEffortData {
        id: effort_id,
        athlete: AthleteRef { id: athlete_id },
        segment: EffortSegmentRef {
            id: segment_id,
            name: format!("Segment {segment_id}"),
            starred: false,
        },
        name: format!("Segment {segment_id}"),
        elapsed_time: 300,
        moving_time: 290,
        start_date: start,
        distance: 900.0,
        device_watts: false,
        average_watts: 0.0,
        kom_rank: None,
        pr_rank: None,
    }
}
