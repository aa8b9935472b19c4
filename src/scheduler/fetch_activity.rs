// ABOUTME: Detail fetch job for one activity with idempotency and quota checks
// ABOUTME: Classifies upstream errors and persists the full detail transactionally
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Activity Fetch
//!
//! The workhorse job: pull one activity's full detail (with segment efforts)
//! and persist it atomically. The gauntlet before the API call runs, in
//! order: the seasonal gate, admission control with per-source discounts,
//! and the duplicate-fetch guard. Errors after the call are classified;
//! most of them finalize the job instead of retrying, because retrying a 404
//! or a poisoned payload only burns quota.

use super::{JobHandler, JobOutcome, ManagerInner, QUEUE_STRAVA};
use crate::admission::BufferPolicy;
use crate::errors::AppResult;
use crate::models::{distance_to_miles, ActivitySource};
use crate::queue::{EnqueueOpts, Job};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Kind tag.
pub const KIND: &str = "fetch_activity";

/// How long a snoozed non-event activity waits during the event window.
const SEASONAL_SNOOZE: Duration = Duration::from_secs(24 * 60 * 60);

/// Rides shorter than this never get the zero-segment refetch.
const ZERO_SEGMENT_MIN_MILES: f64 = 5.0;

/// Admission buffers for detail fetches.
const BUFFERS: BufferPolicy = BufferPolicy {
    base: (105, 605),
    under_3h: (80, 400),
    under_1h: (70, 200),
    under_20m: (70, 200),
};

/// Payload for one detail fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchActivityArgs {
    /// Where the fetch originated.
    pub source: ActivitySource,
    /// Activity to fetch.
    pub activity_id: i64,
    /// Owning athlete.
    pub athlete_id: i64,
    /// Heuristic flag set by the classifier (or optimistically by webhooks).
    pub hugel_potential: bool,
    /// Ride started inside the event window.
    pub on_event_dates: bool,
}

/// Kind defaults: the API-facing queue, unique per payload for five minutes.
#[must_use]
pub fn enqueue_opts(args: &FetchActivityArgs) -> EnqueueOpts {
    EnqueueOpts {
        queue: QUEUE_STRAVA.into(),
        unique_by_args: true,
        unique_period: Some(ChronoDuration::minutes(5)),
        tags: vec![args.athlete_id.to_string(), args.activity_id.to_string()],
        ..EnqueueOpts::default()
    }
}

/// Handler for [`KIND`].
pub struct FetchActivityHandler {
    mgr: Arc<ManagerInner>,
}

impl FetchActivityHandler {
    pub(crate) fn new(mgr: Arc<ManagerInner>) -> Self {
        Self { mgr }
    }

    /// Quota reserve discounts by source: manual fetches may dig deeper into
    /// the buffer than speculative ones, event-relevant rides a little.
    fn admission_discount(args: &FetchActivityArgs) -> (i64, i64) {
        if args.source == ActivitySource::Manual {
            return (10, 115);
        }
        if args.hugel_potential {
            return (5, 50);
        }
        (0, 0)
    }
}

#[async_trait::async_trait]
impl JobHandler for FetchActivityHandler {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn work(&self, job: &Job) -> AppResult<JobOutcome> {
        let mgr = &self.mgr;
        let now = Utc::now();

        let Ok(args) = serde_json::from_value::<FetchActivityArgs>(job.args.clone()) else {
            error!(job_id = job.id, "undecodable fetch payload, job abandoned");
            return Ok(JobOutcome::CompleteWith("invalid payload, job abandoned".into()));
        };

        // Seasonal gate: while the event runs, the quota belongs to rides
        // that can appear on the leaderboard. Manual fetches stay exempt.
        if mgr.config.event_window.contains(now)
            && args.source != ActivitySource::Manual
            && !args.hugel_potential
            && !args.on_event_dates
        {
            debug!(
                activity_id = args.activity_id,
                "event ongoing and activity not relevant, snoozing"
            );
            return Ok(JobOutcome::Snooze(SEASONAL_SNOOZE));
        }

        let (interval_buffer, daily_buffer) = BUFFERS.buffers(now);
        let (discount_interval, discount_daily) = Self::admission_discount(&args);
        let interval_buffer = (interval_buffer - discount_interval).max(0);
        let daily_buffer = (daily_buffer - discount_daily).max(0);
        if !mgr.admission.admit(1, interval_buffer, daily_buffer) {
            let (interval_left, daily_left) = mgr.admission.remaining();
            mgr.rate_limit_log.debounce(|| {
                error!(
                    interval_left,
                    daily_left, "hitting upstream rate limit, job will try again later"
                );
            });
            return mgr.quota_snooze().await;
        }

        // Only track athletes we have credentials for.
        let Some(athlete) = mgr.store.get_athlete_login(args.athlete_id).await? else {
            info!(athlete_id = args.athlete_id, "athlete not found, job abandoned");
            return Ok(JobOutcome::CompleteWith("athlete not found, job abandoned".into()));
        };

        // Duplicate-fetch guard: another source may have just fetched this.
        if let Some(existing) = mgr.store.get_activity_detail(args.activity_id).await? {
            let recently = now - existing.updated_at < ChronoDuration::hours(24);
            if recently && !args.source.always_refetches() {
                return Ok(JobOutcome::CompleteWith("activity already fetched, skipping".into()));
            }
        }

        let detail = match mgr
            .api
            .get_activity(&athlete.access_token, args.activity_id, true)
            .await
        {
            Ok(detail) => detail,
            Err(api_error) if api_error.is_rate_limited() => {
                return mgr.quota_snooze().await;
            }
            Err(api_error) if api_error.is_maintenance() => {
                return mgr.maintenance_snooze(&api_error.to_string()).await;
            }
            Err(api_error) if api_error.is_not_found() => {
                // No activity? Just drop the job, nothing to do.
                return Ok(JobOutcome::CompleteWith(format!(
                    "activity not found: https://www.strava.com/activities/{}",
                    args.activity_id
                )));
            }
            Err(api_error @ crate::upstream::ApiError::Status { .. }) => {
                // We can never fetch this one. Audit it so the diagnostic
                // data survives, then stop retrying.
                mgr.store
                    .insert_failed_job(KIND, job.args.clone(), &api_error.to_string())
                    .await?;
                return Ok(JobOutcome::CompleteWith(format!("failed to fetch: {api_error}")));
            }
            Err(api_error) => {
                // Transport-level failure: worth an engine retry.
                return Err(api_error.into());
            }
        };

        debug!(
            activity_id = args.activity_id,
            segment_count = detail.segment_efforts.len(),
            "activity fetched"
        );

        let prior_downloads = mgr
            .store
            .get_activity_summary(args.activity_id)
            .await?
            .map_or(0, |summary| summary.download_count);

        let segment_count = detail.segment_efforts.len();
        let distance = detail.summary.distance;
        let bundle = detail.into_bundle(args.source, athlete.summit);
        mgr.store.persist_activity_detail(bundle).await?;

        // Sometimes upstream reports zero segments because they populate
        // asynchronously. For a first download of a real ride, check back.
        if segment_count == 0
            && distance_to_miles(distance) > ZERO_SEGMENT_MIN_MILES
            && prior_downloads == 0
        {
            let refetch = FetchActivityArgs {
                source: ActivitySource::ZeroSegmentRefetch,
                ..args
            };
            if let Err(error) = mgr
                .enqueue_fetch_activity(&refetch, job.priority, Some(now + ChronoDuration::hours(2)))
                .await
            {
                error!(
                    activity_id = args.activity_id,
                    athlete_id = args.athlete_id,
                    %error,
                    "error re-enqueuing activity with 0 segments"
                );
            } else {
                info!(activity_id = args.activity_id, "zero segments, re-enqueued for later fetch");
            }
        }

        Ok(JobOutcome::CompleteWith(format!(
            "segments={segment_count} link=https://www.strava.com/activities/{}",
            args.activity_id
        )))
    }
}
