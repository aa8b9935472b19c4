// ABOUTME: Transactional domain persistence trait consumed by the sync engine
// ABOUTME: Multi-step writes are single bundle methods so implementations stay atomic
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Store Abstraction
//!
//! The engine never talks to a database directly; it writes through this
//! trait. Implementations must make each method atomic, in particular the
//! `persist_*` bundle methods, which correspond to one transaction each: if
//! any row in a bundle fails, none of the bundle may remain, so the owning
//! job can safely retry.
//!
//! Schema and migrations live with the implementation, outside this crate.
//! An in-memory implementation for tests ships in [`crate::test_utils`].

use crate::errors::AppResult;
use crate::models::{
    ActivityDetail, ActivityDetailBundle, ActivitySummary, AthleteLogin, BackloadCursor,
    BackloadPageBundle, MapData, Segment, SyncCursor, SyncPageBundle,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Transactional relational store for all domain writes.
#[async_trait]
pub trait Store: Send + Sync {
    // ================================
    // Athlete credentials
    // ================================

    /// Stored credential for an athlete, if they are logged in.
    async fn get_athlete_login(&self, athlete_id: i64) -> AppResult<Option<AthleteLogin>>;

    /// Remove a revoked credential. Returns false when none existed.
    async fn delete_athlete_login(&self, athlete_id: i64) -> AppResult<bool>;

    // ================================
    // Sync cursors
    // ================================

    /// Forward-load cursor for an athlete.
    async fn get_sync_cursor(&self, athlete_id: i64) -> AppResult<Option<SyncCursor>>;

    /// Create or replace a forward-load cursor.
    async fn upsert_sync_cursor(&self, cursor: SyncCursor) -> AppResult<SyncCursor>;

    /// Back-load cursor for an athlete.
    async fn get_backload_cursor(&self, athlete_id: i64) -> AppResult<Option<BackloadCursor>>;

    /// Create or replace a back-load cursor.
    async fn upsert_backload_cursor(&self, cursor: BackloadCursor) -> AppResult<BackloadCursor>;

    /// Logged-in athletes whose next load window has opened (cursor due or
    /// missing), for the periodic load finder.
    async fn athletes_needing_load(&self, now: DateTime<Utc>) -> AppResult<Vec<i64>>;

    // ================================
    // Activities
    // ================================

    /// Summary row, if known.
    async fn get_activity_summary(&self, activity_id: i64) -> AppResult<Option<ActivitySummary>>;

    /// Detail row, if the activity was ever detail-fetched.
    async fn get_activity_detail(&self, activity_id: i64) -> AppResult<Option<ActivityDetail>>;

    /// Persist a full detail fetch in one transaction: map, summary, detail,
    /// every segment effort, the per-segment star rows, and the download
    /// counter increment.
    async fn persist_activity_detail(&self, bundle: ActivityDetailBundle) -> AppResult<()>;

    /// Persist one forward-load page (summaries plus cursor) in one
    /// transaction.
    async fn persist_sync_page(&self, bundle: SyncPageBundle) -> AppResult<()>;

    /// Persist one back-load page (summaries plus cursor) in one transaction.
    async fn persist_backload_page(&self, bundle: BackloadPageBundle) -> AppResult<()>;

    /// Rename an activity. Returns false when the activity is unknown.
    async fn update_activity_name(&self, activity_id: i64, name: &str) -> AppResult<bool>;

    /// Change an activity's sport type. Returns false when unknown.
    async fn update_activity_sport(&self, activity_id: i64, sport_type: &str) -> AppResult<bool>;

    /// Remove an activity row. Returns false when unknown.
    async fn delete_activity(&self, activity_id: i64) -> AppResult<bool>;

    // ================================
    // Segments
    // ================================

    /// Segment ids referenced by any competitive route.
    async fn competitive_segment_ids(&self) -> AppResult<Vec<i64>>;

    /// Segment ids already loaded with full detail.
    async fn loaded_segment_ids(&self) -> AppResult<Vec<i64>>;

    /// Upsert one segment and its map in one transaction.
    async fn upsert_segment(&self, map: MapData, segment: Segment) -> AppResult<()>;

    // ================================
    // Leaderboard views
    // ================================

    /// Refresh the main event leaderboard view.
    async fn refresh_event_leaderboard(&self) -> AppResult<()>;

    /// Refresh the lite-route leaderboard view.
    async fn refresh_lite_leaderboard(&self) -> AppResult<()>;

    /// Refresh a frozen prior-year results view.
    async fn refresh_year_results(&self, year: i32) -> AppResult<()>;

    /// Refresh the all-time leaderboard view.
    async fn refresh_all_time_leaderboard(&self) -> AppResult<()>;

    // ================================
    // Audit & stats
    // ================================

    /// Record a job whose upstream error can never be retried away, so the
    /// diagnostic data survives the job being finalized.
    async fn insert_failed_job(
        &self,
        kind: &str,
        args: serde_json::Value,
        error: &str,
    ) -> AppResult<()>;

    /// Total detail rows, for the stats sampler.
    async fn total_activity_details(&self) -> AppResult<i64>;

    /// Total ride summary rows, for the stats sampler.
    async fn total_ride_summaries(&self) -> AppResult<i64>;
}
