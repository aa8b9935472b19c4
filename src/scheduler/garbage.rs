// ABOUTME: Bounded garbage-collection sweep of finalized control-plane jobs
// ABOUTME: Self-limits wall-clock time and yields before the engine timeout
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

use super::{pause, segments, JobHandler, JobOutcome, ManagerInner, QUEUE_DATABASE};
use crate::errors::AppResult;
use crate::queue::{EnqueueOpts, Job};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Kind tag.
pub const KIND: &str = "garbage_collect";

/// Execution timeout for one sweep.
const SWEEP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Margin before the timeout at which the sweep stops voluntarily, so the
/// engine never has to hard-cancel it mid-delete.
const EXIT_MARGIN: Duration = Duration::from_secs(60);

/// Listing page size.
const PAGE: usize = 100;

/// Enqueue a sweep. Runs at most daily via its uniqueness window.
pub(crate) async fn enqueue(mgr: &ManagerInner) -> AppResult<bool> {
    let opts = EnqueueOpts {
        queue: QUEUE_DATABASE.into(),
        max_attempts: 2,
        unique_by_args: true,
        unique_period: Some(ChronoDuration::hours(23)),
        ..EnqueueOpts::default()
    };
    let enqueued = mgr
        .queue
        .enqueue(KIND, serde_json::json!({}), opts)
        .await?;
    Ok(enqueued.inserted)
}

/// Handler for [`KIND`].
pub struct GarbageCollectHandler {
    mgr: Arc<ManagerInner>,
}

impl GarbageCollectHandler {
    pub(crate) fn new(mgr: Arc<ManagerInner>) -> Self {
        Self { mgr }
    }
}

#[async_trait::async_trait]
impl JobHandler for GarbageCollectHandler {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn timeout(&self) -> Duration {
        SWEEP_TIMEOUT
    }

    async fn work(&self, _job: &Job) -> AppResult<JobOutcome> {
        let mgr = &self.mgr;
        let started = Instant::now();
        // 24h retention for finalized control-plane jobs.
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let kinds = [pause::KIND, segments::KIND];

        let mut total = 0_usize;
        let mut cursor: Option<i64> = None;

        loop {
            if started.elapsed() > SWEEP_TIMEOUT - EXIT_MARGIN {
                // Exit before the engine is forced to cancel us.
                break;
            }

            let page = mgr.queue.list_finalized(&kinds, cutoff, cursor, PAGE).await?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|job| job.id);

            for job in page {
                mgr.queue.delete(job.id).await?;
                total += 1;
            }
        }

        Ok(JobOutcome::CompleteWith(format!("total={total}")))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{context, leased_job};
    use super::super::{pause, JobHandler, JobOutcome};
    use super::{GarbageCollectHandler, KIND};
    use crate::queue::{EnqueueOpts, JobQueue};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn deletes_only_old_finalized_target_kinds() {
        let ctx = context();
        let now = Utc::now();

        // Two finalized resume jobs: one two days old, one fresh.
        let mut finalized = Vec::new();
        for _ in 0..2 {
            let id = ctx
                .queue
                .enqueue(
                    pause::KIND,
                    serde_json::json!({"queue": "strava_queue"}),
                    EnqueueOpts { queue: "control_queue".into(), ..EnqueueOpts::default() },
                )
                .await
                .unwrap()
                .job_id;
            ctx.queue.lease("control_queue", now).await.unwrap().unwrap();
            ctx.queue.complete(id, None).await.unwrap();
            finalized.push(id);
        }
        ctx.queue.backdate_finalized(finalized[0], now - Duration::days(2));

        // An old finalized job of a kind GC does not touch.
        let fetch_id = ctx
            .queue
            .enqueue(
                "fetch_activity",
                serde_json::json!({"activity_id": 1}),
                EnqueueOpts { queue: "strava_queue".into(), ..EnqueueOpts::default() },
            )
            .await
            .unwrap()
            .job_id;
        ctx.queue.lease("strava_queue", now).await.unwrap().unwrap();
        ctx.queue.complete(fetch_id, None).await.unwrap();
        ctx.queue.backdate_finalized(fetch_id, now - Duration::days(2));

        // A pending resume job must survive (it has no finalized_at).
        ctx.queue
            .enqueue(
                pause::KIND,
                serde_json::json!({"queue": "backload_queue"}),
                EnqueueOpts { queue: "control_queue".into(), ..EnqueueOpts::default() },
            )
            .await
            .unwrap();

        let handler = GarbageCollectHandler::new(Arc::clone(&ctx.inner));
        let outcome = handler
            .work(&leased_job(KIND, serde_json::json!({})))
            .await
            .unwrap();
        assert!(matches!(outcome, JobOutcome::CompleteWith(note) if note == "total=1"));

        assert!(ctx.queue.get(finalized[0]).await.unwrap().is_none(), "old resume deleted");
        assert!(ctx.queue.get(finalized[1]).await.unwrap().is_some(), "fresh resume kept");
        assert!(ctx.queue.get(fetch_id).await.unwrap().is_some(), "other kinds kept");
        assert_eq!(ctx.queue.list_kind(pause::KIND).await.unwrap().len(), 2);
    }
}
