// ABOUTME: Canonical forward pagination strategy for athlete activity history
// ABOUTME: Advances the newest-cursor watermark and enqueues ride detail fetches
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Forward Load
//!
//! Walks an athlete's activities forward in time from the cursor watermark,
//! one page per invocation. A non-empty page persists and snoozes a few
//! seconds to continue; an empty page marks the load complete and pushes the
//! next attempt out 7-10 days; webhooks cover the interim.

use super::athlete_sync::SyncStrategy;
use super::fetch_activity::FetchActivityArgs;
use super::{JobOutcome, ManagerInner};
use crate::admission::BufferPolicy;
use crate::classify;
use crate::errors::AppResult;
use crate::models::{ActivitySource, SyncCursor, SyncPageBundle};
use crate::upstream::ListParams;
use chrono::{Duration, Utc};
use rand::Rng;
use std::time::Duration as StdDuration;
use tracing::{error, info};

/// Continue-pagination snooze.
const CONTINUE_SNOOZE: StdDuration = StdDuration::from_secs(5);

/// Admission buffers for forward loads.
const BUFFERS: BufferPolicy = BufferPolicy {
    base: (150, 500),
    under_3h: (80, 300),
    under_1h: (50, 150),
    under_20m: (50, 100),
};

/// The canonical strategy.
pub struct ForwardLoad;

#[async_trait::async_trait]
impl SyncStrategy for ForwardLoad {
    fn name(&self) -> &'static str {
        "forward"
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
                    job = "forward_athlete_data",
                    "hitting upstream rate limit, job will try again later"
                );
            });
            return mgr.quota_snooze().await;
        }

        // A non-logged-in athlete has nothing to load.
        let Some(athlete) = mgr.store.get_athlete_login(athlete_id).await? else {
            return Ok(JobOutcome::CompleteWith(
                "athlete has no authentication, skipping any loading".into(),
            ));
        };

        let mut cursor = match mgr.store.get_sync_cursor(athlete_id).await? {
            Some(cursor) => cursor,
            None => {
                mgr.store
                    .upsert_sync_cursor(SyncCursor::seed(athlete_id, now))
                    .await?
            }
        };

        let page_floor = cursor.activity_time_after;
        let params = ListParams {
            per_page: mgr.config.page_size,
            after: Some(page_floor),
            before: None,
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
                // Revoked credential: clean up and stop scheduling quietly.
                let _ = mgr.store.delete_athlete_login(athlete_id).await;
                return Ok(JobOutcome::CompleteWith(
                    "unauthenticated athlete, credentials removed".into(),
                ));
            }
            Err(api_error) => return Err(api_error.into()),
        };

        let page_empty = activities.is_empty();
        cursor.last_load_complete = page_empty;
        cursor.last_touched = now;
        cursor.next_load_not_before = if page_empty {
            // Wait 7-10 days before trying again. Webhooks should capture
            // all new activities in the meantime.
            let jitter_hours = rand::thread_rng().gen_range(0..24 * 3);
            now + Duration::days(7) + Duration::hours(jitter_hours)
        } else {
            // Just a little bump to let another athlete go next.
            now + Duration::milliseconds(200)
        };

        let mut rows = Vec::with_capacity(activities.len());
        let mut detail_fetches = Vec::new();
        for activity in activities {
            let (map, summary) = activity.into_rows();
            cursor.advance_watermark(summary.start_date);

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
                detail_fetches.push((args, classify::detail_fetch_priority(&summary, now)));
            }

            rows.push((map, summary));
        }

        info!(
            athlete_id,
            before = %page_floor,
            time_after = %cursor.activity_time_after,
            complete = cursor.last_load_complete,
            activities_loaded = rows.len(),
            "load step"
        );

        mgr.store
            .persist_sync_page(SyncPageBundle {
                rows,
                cursor: cursor.clone(),
            })
            .await?;

        // Detail fetches go in only after the page landed; unique keys make
        // a retried page re-enqueue harmlessly. The delay covers upstream's
        // async segment population for fresh uploads.
        let fetch_at = now + Duration::from_std(mgr.config.detail_fetch_delay)?;
        for (args, priority) in detail_fetches {
            mgr.enqueue_fetch_activity(&args, priority, Some(fetch_at)).await?;
        }

        if page_empty {
            Ok(JobOutcome::Complete)
        } else {
            // Keep going until we have no more activities to load.
            Ok(JobOutcome::Snooze(CONTINUE_SNOOZE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{close_quota, context, leased_job};
    use super::super::{athlete_sync, fetch_activity, JobHandler, JobOutcome, QUEUE_STRAVA};
    use super::ForwardLoad;
    use crate::config::SyncStrategyKind;
    use crate::queue::{JobQueue, Priority};
    use crate::store::Store;
    use crate::test_utils::{login, ride};
    use crate::upstream::ApiError;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn handler(
        ctx: &super::super::testing::TestContext,
    ) -> athlete_sync::AthleteSyncHandler {
        assert_eq!(ctx.inner.config.sync_strategy, SyncStrategyKind::Forward);
        athlete_sync::AthleteSyncHandler::new(Arc::clone(&ctx.inner), Arc::new(ForwardLoad))
    }

    fn sync_job(athlete_id: i64) -> crate::queue::Job {
        leased_job(
            athlete_sync::KIND,
            serde_json::to_value(athlete_sync::AthleteSyncArgs { athlete_id }).unwrap(),
        )
    }

    #[tokio::test]
    async fn empty_page_completes_and_backs_off_a_week() {
        let ctx = context();
        ctx.store.add_login(login(7));
        ctx.api.push_activities_page(Ok(Vec::new()));

        let before = Utc::now();
        let outcome = handler(&ctx).work(&sync_job(7)).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Complete));

        let cursor = ctx.store.get_sync_cursor(7).await.unwrap().unwrap();
        assert!(cursor.last_load_complete);
        assert!(cursor.next_load_not_before >= before + Duration::days(7));
        assert!(cursor.next_load_not_before <= before + Duration::days(10));
    }

    #[tokio::test]
    async fn non_empty_page_persists_and_continues() {
        let ctx = context();
        ctx.store.add_login(login(7));
        let ride_start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().unwrap();
        ctx.api
            .push_activities_page(Ok(vec![ride(11, 7, ride_start), ride(12, 7, ride_start + Duration::days(1))]));

        let outcome = handler(&ctx).work(&sync_job(7)).await.unwrap();
        assert!(
            matches!(outcome, JobOutcome::Snooze(delay) if delay.as_secs() == 5),
            "non-empty pages continue by snooze"
        );

        let cursor = ctx.store.get_sync_cursor(7).await.unwrap().unwrap();
        assert_eq!(cursor.activity_time_after, ride_start + Duration::days(1));
        assert!(!cursor.last_load_complete);
        assert!(ctx.store.summary(11).is_some());
        assert!(ctx.store.summary(12).is_some());

        // Both rides get a delayed detail fetch on the API queue.
        let fetches = ctx.queue.list_kind(fetch_activity::KIND).await.unwrap();
        assert_eq!(fetches.len(), 2);
        for fetch in &fetches {
            assert_eq!(fetch.queue, QUEUE_STRAVA);
            assert!(fetch.scheduled_at >= Utc::now() + Duration::minutes(4));
            assert_eq!(fetch.priority, Priority::Low, "old rides are low priority");
        }
    }

    #[tokio::test]
    async fn watermark_is_monotone_across_pages() {
        let ctx = context();
        ctx.store.add_login(login(7));
        let newer = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).single().unwrap();
        let older = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).single().unwrap();
        // Upstream misbehaves and returns an older ride on the second page.
        ctx.api.push_activities_page(Ok(vec![ride(21, 7, newer)]));
        ctx.api.push_activities_page(Ok(vec![ride(22, 7, older)]));

        let worker = handler(&ctx);
        worker.work(&sync_job(7)).await.unwrap();
        let after_first = ctx.store.get_sync_cursor(7).await.unwrap().unwrap();
        assert_eq!(after_first.activity_time_after, newer);

        worker.work(&sync_job(7)).await.unwrap();
        let after_second = ctx.store.get_sync_cursor(7).await.unwrap().unwrap();
        assert!(
            after_second.activity_time_after >= after_first.activity_time_after,
            "cursor watermark must never decrease"
        );
    }

    #[tokio::test]
    async fn revoked_credential_is_terminal_and_silent() {
        let ctx = context();
        ctx.store.add_login(login(7));
        ctx.api.push_activities_page(Err(ApiError::Status {
            status: 401,
            body: String::new(),
        }));

        let outcome = handler(&ctx).work(&sync_job(7)).await.unwrap();
        assert!(matches!(outcome, JobOutcome::CompleteWith(_)));
        assert!(
            ctx.store.get_athlete_login(7).await.unwrap().is_none(),
            "revoked credentials are deleted"
        );
        assert!(ctx.queue.list_kind(athlete_sync::KIND).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limited_page_leaves_cursor_untouched() {
        let ctx = context();
        ctx.store.add_login(login(7));
        ctx.api.push_activities_page(Err(ApiError::Status {
            status: 429,
            body: String::new(),
        }));

        let outcome = handler(&ctx).work(&sync_job(7)).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Snooze(_)));

        let cursor = ctx.store.get_sync_cursor(7).await.unwrap().unwrap();
        assert!(!cursor.last_load_complete, "seeded cursor only");
    }

    #[tokio::test]
    async fn admission_denied_before_any_api_call() {
        let ctx = context();
        ctx.store.add_login(login(7));
        close_quota(&ctx.admission);

        let outcome = handler(&ctx).work(&sync_job(7)).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Snooze(_)));
        assert!(ctx.api.list_calls().is_empty(), "denied admission spends no quota");
    }

    #[tokio::test]
    async fn big_recent_ride_jumps_the_queue() {
        let ctx = context();
        ctx.store.add_login(login(7));
        let mut monster = ride(31, 7, Utc::now() - Duration::days(2));
        monster.distance = 160_934.0; // 100 miles
        monster.total_elevation_gain = 2600.0; // ~8500 ft
        ctx.api.push_activities_page(Ok(vec![monster]));

        handler(&ctx).work(&sync_job(7)).await.unwrap();

        let fetches = ctx.queue.list_kind(fetch_activity::KIND).await.unwrap();
        assert_eq!(fetches.len(), 1);
        assert_eq!(fetches[0].priority, Priority::High);
        let args: fetch_activity::FetchActivityArgs =
            serde_json::from_value(fetches[0].args.clone()).unwrap();
        assert!(args.hugel_potential);
    }
}
