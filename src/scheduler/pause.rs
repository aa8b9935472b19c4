// ABOUTME: Queue pause/resume control jobs
// ABOUTME: A paused queue always carries a scheduled resume job to wake it
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

use super::{JobHandler, JobOutcome, ManagerInner, QUEUE_CONTROL};
use crate::errors::AppResult;
use crate::queue::{EnqueueOpts, Job};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Kind tag.
pub const KIND: &str = "resume";

/// Payload: which queue to wake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeArgs {
    /// Queue to resume.
    pub queue: String,
}

/// Schedule a resume job for `queue` at `until`.
pub(crate) async fn enqueue_resume(
    mgr: &ManagerInner,
    queue: &str,
    until: DateTime<Utc>,
) -> AppResult<bool> {
    let args = ResumeArgs {
        queue: queue.to_owned(),
    };
    let opts = EnqueueOpts {
        queue: QUEUE_CONTROL.into(),
        ..EnqueueOpts::default()
    }
    .at(until);
    let enqueued = mgr
        .queue
        .enqueue(KIND, serde_json::to_value(&args)?, opts)
        .await?;
    Ok(enqueued.inserted)
}

/// Handler for [`KIND`].
pub struct ResumeHandler {
    mgr: Arc<ManagerInner>,
}

impl ResumeHandler {
    pub(crate) fn new(mgr: Arc<ManagerInner>) -> Self {
        Self { mgr }
    }
}

#[async_trait::async_trait]
impl JobHandler for ResumeHandler {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn work(&self, job: &Job) -> AppResult<JobOutcome> {
        let Ok(args) = serde_json::from_value::<ResumeArgs>(job.args.clone()) else {
            error!(job_id = job.id, "undecodable resume payload, job abandoned");
            return Ok(JobOutcome::CompleteWith("invalid payload, job abandoned".into()));
        };

        let was_paused = self
            .mgr
            .queue
            .pause_state(&args.queue)
            .await?
            .is_some();
        self.mgr.queue.resume(&args.queue).await?;
        Ok(JobOutcome::CompleteWith(format!(
            "queue {} paused was {was_paused}",
            args.queue
        )))
    }
}
