// ABOUTME: Competitive segment reload job
// ABOUTME: Diffs needed route segments against loaded ones and fetches the gap
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

use super::{JobHandler, JobOutcome, ManagerInner, QUEUE_DATABASE};
use crate::admission::BufferPolicy;
use crate::errors::AppResult;
use crate::queue::{EnqueueOpts, Job, Priority};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

/// Kind tag.
pub const KIND: &str = "reload_segments";

/// Admission buffers for segment loads.
const BUFFERS: BufferPolicy = BufferPolicy {
    base: (100, 500),
    under_3h: (50, 500),
    under_1h: (50, 500),
    under_20m: (50, 500),
};

/// Enqueue a reload; the uniqueness window debounces callers.
pub(crate) async fn enqueue(mgr: &ManagerInner) -> AppResult<bool> {
    let opts = EnqueueOpts {
        queue: QUEUE_DATABASE.into(),
        priority: Priority::Highest,
        unique_by_args: true,
        unique_period: Some(ChronoDuration::minutes(5)),
        ..EnqueueOpts::default()
    };
    let enqueued = mgr
        .queue
        .enqueue(KIND, serde_json::json!({}), opts)
        .await?;
    Ok(enqueued.inserted)
}

/// Handler for [`KIND`].
pub struct ReloadSegmentsHandler {
    mgr: Arc<ManagerInner>,
}

impl ReloadSegmentsHandler {
    pub(crate) fn new(mgr: Arc<ManagerInner>) -> Self {
        Self { mgr }
    }
}

#[async_trait::async_trait]
impl JobHandler for ReloadSegmentsHandler {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn work(&self, _job: &Job) -> AppResult<JobOutcome> {
        let mgr = &self.mgr;
        let now = Utc::now();

        // Segment loads ride on the designated admin credential: segments
        // are global objects, not athlete-scoped.
        let admin_id = mgr.config.segment_admin_athlete;
        let Some(admin) = mgr.store.get_athlete_login(admin_id).await? else {
            error!(athlete_id = admin_id, "segment admin credential is required to load segments");
            return Err(anyhow::anyhow!("segment admin credential missing"));
        };

        let needed: HashSet<i64> = mgr.store.competitive_segment_ids().await?.into_iter().collect();
        let loaded: HashSet<i64> = mgr.store.loaded_segment_ids().await?.into_iter().collect();
        let missing: Vec<i64> = needed.difference(&loaded).copied().collect();

        if missing.is_empty() {
            return Ok(JobOutcome::CompleteWith("no segments to load".into()));
        }
        debug!(needed = missing.len(), "need to load segments");

        let calls = i64::try_from(missing.len()).unwrap_or(i64::MAX);
        let (interval_buffer, daily_buffer) = BUFFERS.buffers(now);
        if !mgr.admission.admit(calls, interval_buffer, daily_buffer) {
            let (interval_left, daily_left) = mgr.admission.remaining();
            mgr.rate_limit_log.debounce(|| {
                error!(
                    interval_left,
                    daily_left,
                    calls,
                    job = "backload_segment_data",
                    "hitting upstream rate limit, job will try again later"
                );
            });
            return mgr.quota_snooze().await;
        }

        let mut count = 0_usize;
        for segment_id in missing {
            let segment = match mgr.api.get_segment(&admin.access_token, segment_id).await {
                Ok(segment) => segment,
                Err(api_error) if api_error.is_rate_limited() => {
                    return mgr.quota_snooze().await;
                }
                Err(api_error) if api_error.is_maintenance() => {
                    return mgr.maintenance_snooze(&api_error.to_string()).await;
                }
                Err(api_error) => return Err(api_error.into()),
            };

            let (map, row) = segment.into_rows();
            mgr.store.upsert_segment(map, row).await?;
            count += 1;
        }

        Ok(JobOutcome::CompleteWith(format!("{count} segments loaded")))
    }
}
