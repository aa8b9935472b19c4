// ABOUTME: Leaderboard materialized view refresh job
// ABOUTME: Refreshes the four leaderboard views concurrently and logs durations
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

use super::{JobHandler, JobOutcome, ManagerInner, QUEUE_DATABASE};
use crate::errors::AppResult;
use crate::queue::{EnqueueOpts, Job, Priority};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Kind tag.
pub const KIND: &str = "refresh_views";

/// Frozen results year still served on the site.
const FROZEN_RESULTS_YEAR: i32 = 2023;

/// Enqueue a refresh; the uniqueness window debounces callers.
pub(crate) async fn enqueue(mgr: &ManagerInner) -> AppResult<bool> {
    let opts = EnqueueOpts {
        queue: QUEUE_DATABASE.into(),
        priority: Priority::Highest,
        unique_by_args: true,
        unique_period: Some(ChronoDuration::minutes(45)),
        ..EnqueueOpts::default()
    };
    let enqueued = mgr
        .queue
        .enqueue(KIND, serde_json::json!({}), opts)
        .await?;
    Ok(enqueued.inserted)
}

/// Handler for [`KIND`].
pub struct RefreshViewsHandler {
    mgr: Arc<ManagerInner>,
}

impl RefreshViewsHandler {
    pub(crate) fn new(mgr: Arc<ManagerInner>) -> Self {
        Self { mgr }
    }
}

#[async_trait::async_trait]
impl JobHandler for RefreshViewsHandler {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    async fn work(&self, _job: &Job) -> AppResult<JobOutcome> {
        let store = &self.mgr.store;
        let started = Instant::now();

        let (event, lite, year, all_time) = tokio::join!(
            store.refresh_event_leaderboard(),
            store.refresh_lite_leaderboard(),
            store.refresh_year_results(FROZEN_RESULTS_YEAR),
            store.refresh_all_time_leaderboard(),
        );

        let elapsed = started.elapsed();
        info!(
            event_err = event.is_err(),
            lite_err = lite.is_err(),
            year_err = year.is_err(),
            all_time_err = all_time.is_err(),
            duration_s = elapsed.as_secs_f64(),
            "refresh views"
        );

        event?;
        lite?;
        year?;
        all_time?;
        Ok(JobOutcome::CompleteWith(format!(
            "refreshed 4 views in {:.3}s",
            elapsed.as_secs_f64()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{context, leased_job};
    use super::super::JobHandler;
    use super::{RefreshViewsHandler, KIND};
    use std::sync::Arc;

    #[tokio::test]
    async fn refreshes_all_four_views() {
        let ctx = context();
        let handler = RefreshViewsHandler::new(Arc::clone(&ctx.inner));
        handler
            .work(&leased_job(KIND, serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(ctx.store.refresh_count("event"), 1);
        assert_eq!(ctx.store.refresh_count("lite"), 1);
        assert_eq!(ctx.store.refresh_count("year_2023"), 1);
        assert_eq!(ctx.store.refresh_count("all_time"), 1);
    }
}
