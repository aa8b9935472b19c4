// ABOUTME: Legacy back-load pagination strategy walking oldest-unseen history
// ABOUTME: Retained as a config-selectable fallback behind the sync strategy seam
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Back Load
//!
//! The older loader, functionally superseded by
//! [`forward_load`](super::forward_load) but preserved as a fallback. It
//! first walks history backwards from the earliest activity seen, one page
//! at a time; once an empty page marks history done it switches to picking
//! up anything newer than the newest start date it has ingested.

use super::athlete_sync::SyncStrategy;
use super::fetch_activity::FetchActivityArgs;
use super::{JobOutcome, ManagerInner};
use crate::admission::BufferPolicy;
use crate::classify;
use crate::errors::AppResult;
use crate::models::{ActivitySource, BackloadCursor, BackloadPageBundle};
use crate::queue::Priority;
use crate::upstream::ListParams;
use chrono::{DateTime, Duration, Utc};
use std::time::Duration as StdDuration;
use tracing::{debug, error};

/// Continue-pagination snooze.
const CONTINUE_SNOOZE: StdDuration = StdDuration::from_secs(5);

/// Admission buffers for back loads (the legacy tiering).
const BUFFERS: BufferPolicy = BufferPolicy {
    base: (100, 500),
    under_3h: (50, 300),
    under_1h: (50, 100),
    under_20m: (50, 100),
};

/// Detail-fetch priority for backload discoveries. Old rides drop to the
/// lowest tier: historical bulk backfill never outranks fresh work.
fn backload_priority(summary: &crate::models::ActivitySummary, now: DateTime<Utc>) -> Priority {
    match classify::detail_fetch_priority(summary, now) {
        Priority::Low => Priority::Lowest,
        priority => priority,
    }
}

/// The legacy strategy.
pub struct BackLoad;

#[async_trait::async_trait]
impl SyncStrategy for BackLoad {
    fn name(&self) -> &'static str {
        "back"
    }

    async fn step(&self, mgr: &ManagerInner, athlete_id: i64) -> AppResult<JobOutcome> {
        let now = Utc::now();

        let (interval_buffer, daily_buffer) = BUFFERS.buffers(now);
        if !mgr.admission.admit(1, interval_buffer, daily_buffer) {
            let (interval_left, daily_left) = mgr.admission.remaining();
            mgr.rate_limit_log.debounce(|| {
                error!(
                    interval_left,
                    daily_left,
                    job = "backload_athlete_data",
                    "hitting upstream rate limit, job will try again later"
                );
            });
            return mgr.quota_snooze().await;
        }

        let Some(athlete) = mgr.store.get_athlete_login(athlete_id).await? else {
            return Ok(JobOutcome::CompleteWith(
                "athlete has no authentication, skipping any loading".into(),
            ));
        };

        let mut cursor = match mgr.store.get_backload_cursor(athlete_id).await? {
            Some(cursor) => cursor,
            None => {
                mgr.store
                    .upsert_backload_cursor(BackloadCursor::seed(athlete_id, now))
                    .await?
            }
        };

        let backloading_history = !cursor.earliest_done;
        let params = if backloading_history {
            ListParams {
                per_page: mgr.config.page_size,
                before: Some(cursor.earliest_activity - Duration::seconds(1)),
                after: None,
            }
        } else {
            ListParams {
                per_page: mgr.config.page_size,
                after: Some(cursor.newest_activity_start),
                before: None,
            }
        };

        let activities = match mgr.api.list_activities(&athlete.access_token, params).await {
            Ok(activities) => activities,
            Err(api_error) if api_error.is_rate_limited() => {
                return mgr.quota_snooze().await;
            }
            Err(api_error) if api_error.is_maintenance() => {
                return mgr.maintenance_snooze(&api_error.to_string()).await;
            }
            Err(api_error) if api_error.is_unauthenticated() => {
                let _ = mgr.store.delete_athlete_login(athlete_id).await;
                return Ok(JobOutcome::CompleteWith(
                    "unauthenticated athlete, credentials removed".into(),
                ));
            }
            Err(api_error) => return Err(api_error.into()),
        };

        debug!(
            athlete_id,
            activities = activities.len(),
            backloading_history,
            "backloading athlete"
        );

        // No activities in this direction means the walk is done.
        if activities.is_empty() {
            cursor.earliest_done = true;
            cursor.last_load_incomplete = false;
            cursor.last_error = None;
            cursor.last_touched = now;
            cursor.next_load_not_before = now + Duration::minutes(15);
            mgr.store.upsert_backload_cursor(cursor).await?;
            return Ok(JobOutcome::Complete);
        }

        let mut rows = Vec::with_capacity(activities.len());
        let mut detail_fetches = Vec::new();
        for activity in activities {
            let (map, summary) = activity.into_rows();

            if classify::is_bike_ride(&summary.activity_type)
                || classify::is_bike_ride(&summary.sport_type)
            {
                let args = FetchActivityArgs {
                    source: ActivitySource::Backload,
                    activity_id: summary.id,
                    athlete_id,
                    hugel_potential: classify::can_be_hugel(&summary)
                        || classify::can_be_hugel_lite(&summary),
                    on_event_dates: classify::on_event_dates(&summary, mgr.config.event_window),
                };
                detail_fetches.push((args, backload_priority(&summary, now)));
            }

            rows.push((map, summary));
        }

        // Pages come newest-first: the head advances the newest watermark,
        // the tail is the earliest activity seen so far.
        if let Some((_, newest)) = rows.first() {
            if newest.start_date > cursor.newest_activity_start {
                cursor.newest_activity_start = newest.start_date;
            }
        }
        if backloading_history {
            if let Some((_, earliest)) = rows.last() {
                cursor.earliest_activity = earliest.start_date;
                cursor.earliest_activity_id = earliest.id;
                cursor.earliest_done = false;
            }
        }
        cursor.last_load_incomplete = true;
        cursor.last_error = None;
        cursor.last_touched = now;
        // When we are not done, do not prevent loading more.
        cursor.next_load_not_before = now;

        mgr.store
            .persist_backload_page(BackloadPageBundle {
                rows,
                cursor: cursor.clone(),
            })
            .await?;

        let fetch_at = now + Duration::from_std(mgr.config.detail_fetch_delay)?;
        for (args, priority) in detail_fetches {
            mgr.enqueue_fetch_activity(&args, priority, Some(fetch_at)).await?;
        }

        Ok(JobOutcome::Snooze(CONTINUE_SNOOZE))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{context, leased_job};
    use super::super::{athlete_sync, fetch_activity, JobHandler, JobOutcome};
    use super::BackLoad;
    use crate::queue::{JobQueue, Priority};
    use crate::store::Store;
    use crate::test_utils::{login, ride};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn handler(ctx: &super::super::testing::TestContext) -> athlete_sync::AthleteSyncHandler {
        athlete_sync::AthleteSyncHandler::new(Arc::clone(&ctx.inner), Arc::new(BackLoad))
    }

    fn sync_job(athlete_id: i64) -> crate::queue::Job {
        leased_job(
            athlete_sync::KIND,
            serde_json::to_value(athlete_sync::AthleteSyncArgs { athlete_id }).unwrap(),
        )
    }

    #[tokio::test]
    async fn walks_history_then_marks_done() {
        let ctx = context();
        ctx.store.add_login(login(7));
        let old_ride = Utc.with_ymd_and_hms(2019, 3, 1, 8, 0, 0).single().unwrap();
        ctx.api.push_activities_page(Ok(vec![ride(41, 7, old_ride)]));
        ctx.api.push_activities_page(Ok(Vec::new()));

        let worker = handler(&ctx);

        // First step walks history backwards and records the earliest seen.
        let outcome = worker.work(&sync_job(7)).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Snooze(_)), "more pages likely remain");
        let cursor = ctx.store.get_backload_cursor(7).await.unwrap().unwrap();
        assert_eq!(cursor.earliest_activity, old_ride);
        assert_eq!(cursor.earliest_activity_id, 41);
        assert!(!cursor.earliest_done);
        assert!(cursor.last_load_incomplete);

        // The empty page finishes the walk.
        let outcome = worker.work(&sync_job(7)).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Complete));
        let cursor = ctx.store.get_backload_cursor(7).await.unwrap().unwrap();
        assert!(cursor.earliest_done);
        assert!(!cursor.last_load_incomplete);

        // History exhausted: the next request flips to the forward direction.
        let calls = ctx.api.list_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].before.is_some() && calls[0].after.is_none());
        ctx.api.push_activities_page(Ok(Vec::new()));
        worker.work(&sync_job(7)).await.unwrap();
        let calls = ctx.api.list_calls();
        assert!(calls[2].after.is_some() && calls[2].before.is_none());
    }

    #[tokio::test]
    async fn old_rides_backfill_at_lowest_priority() {
        let ctx = context();
        ctx.store.add_login(login(7));
        let old_ride = Utc.with_ymd_and_hms(2019, 3, 1, 8, 0, 0).single().unwrap();
        ctx.api.push_activities_page(Ok(vec![ride(41, 7, old_ride)]));

        handler(&ctx).work(&sync_job(7)).await.unwrap();

        let fetches = ctx.queue.list_kind(fetch_activity::KIND).await.unwrap();
        assert_eq!(fetches.len(), 1);
        assert_eq!(fetches[0].priority, Priority::Lowest);
    }

    #[tokio::test]
    async fn newest_watermark_tracks_page_head() {
        let ctx = context();
        ctx.store.add_login(login(7));
        let newer = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).single().unwrap();
        let older = newer - Duration::days(30);
        // Pages come newest-first.
        ctx.api
            .push_activities_page(Ok(vec![ride(51, 7, newer), ride(52, 7, older)]));

        handler(&ctx).work(&sync_job(7)).await.unwrap();

        let cursor = ctx.store.get_backload_cursor(7).await.unwrap().unwrap();
        assert_eq!(cursor.newest_activity_start, newer);
        assert_eq!(cursor.earliest_activity, older);
    }
}
