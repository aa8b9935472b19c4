// ABOUTME: Periodic sweep that enqueues athlete sync jobs whose cursors are due
// ABOUTME: Feeds the pagination queue without double-inserting pending athletes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

use super::{JobHandler, JobOutcome, ManagerInner, QUEUE_DATABASE};
use crate::errors::AppResult;
use crate::queue::{EnqueueOpts, Job};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::warn;

/// Kind tag.
pub const KIND: &str = "load_finder";

/// Enqueue a finder sweep; the uniqueness window debounces callers.
pub(crate) async fn enqueue(mgr: &ManagerInner) -> AppResult<bool> {
    let opts = EnqueueOpts {
        queue: QUEUE_DATABASE.into(),
        max_attempts: 3,
        unique_by_args: true,
        unique_period: Some(ChronoDuration::minutes(25)),
        ..EnqueueOpts::default()
    };
    let enqueued = mgr
        .queue
        .enqueue(KIND, serde_json::json!({}), opts)
        .await?;
    Ok(enqueued.inserted)
}

/// Handler for [`KIND`].
pub struct LoadFinderHandler {
    mgr: Arc<ManagerInner>,
}

impl LoadFinderHandler {
    pub(crate) fn new(mgr: Arc<ManagerInner>) -> Self {
        Self { mgr }
    }
}

#[async_trait::async_trait]
impl JobHandler for LoadFinderHandler {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn work(&self, _job: &Job) -> AppResult<JobOutcome> {
        let mgr = &self.mgr;
        let due = mgr.store.athletes_needing_load(Utc::now()).await?;

        let mut started = 0_usize;
        let mut skipped = 0_usize;
        let mut failed = 0_usize;
        for athlete_id in &due {
            match mgr.enqueue_athlete_sync(*athlete_id, None).await {
                Ok(true) => started += 1,
                Ok(false) => skipped += 1,
                Err(error) => {
                    warn!(athlete_id, %error, "enqueue athlete sync failed");
                    failed += 1;
                }
            }
        }

        Ok(JobOutcome::CompleteWith(format!(
            "{} athletes included, {started} load jobs started, {skipped} skipped, {failed} failed",
            due.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{context, leased_job};
    use super::super::{athlete_sync, JobHandler, JobOutcome};
    use super::{LoadFinderHandler, KIND};
    use crate::queue::JobQueue;
    use crate::test_utils::login;
    use std::sync::Arc;

    #[tokio::test]
    async fn enqueues_due_athletes_once() {
        let ctx = context();
        ctx.store.add_login(login(7));
        ctx.store.add_login(login(8));

        let handler = LoadFinderHandler::new(Arc::clone(&ctx.inner));
        let outcome = handler
            .work(&leased_job(KIND, serde_json::json!({})))
            .await
            .unwrap();
        assert!(matches!(outcome, JobOutcome::CompleteWith(note) if note.contains("2 load jobs started")));
        assert_eq!(ctx.queue.list_kind(athlete_sync::KIND).await.unwrap().len(), 2);

        // A second sweep sees the pending jobs and skips both athletes.
        let outcome = handler
            .work(&leased_job(KIND, serde_json::json!({})))
            .await
            .unwrap();
        assert!(matches!(outcome, JobOutcome::CompleteWith(note) if note.contains("2 skipped")));
        assert_eq!(ctx.queue.list_kind(athlete_sync::KIND).await.unwrap().len(), 2);
    }
}
