// ABOUTME: Athlete pagination sync job with pluggable direction strategies
// ABOUTME: One job kind drives either the forward or the legacy back loader
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Athlete Sync
//!
//! One job kind, two pagination state machines. The configured
//! [`SyncStrategy`] decides which direction the athlete's history is walked;
//! both strategies share the admission gate, the transactional page persist,
//! and the continue-by-snooze pattern. Keeping both behind one seam means a
//! config flip, not a code path fork, selects the loader.

use super::{JobHandler, JobOutcome, ManagerInner, QUEUE_BACKLOAD};
use crate::errors::AppResult;
use crate::queue::{EnqueueOpts, Job};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Kind tag.
pub const KIND: &str = "athlete_sync";

/// Payload: which athlete to advance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AthleteSyncArgs {
    /// Athlete whose cursor this job owns while running.
    pub athlete_id: i64,
}

/// Kind defaults: the pagination queue, unique per athlete while pending.
#[must_use]
pub fn enqueue_opts(args: &AthleteSyncArgs) -> EnqueueOpts {
    EnqueueOpts {
        queue: QUEUE_BACKLOAD.into(),
        unique_by_args: true,
        tags: vec![args.athlete_id.to_string()],
        ..EnqueueOpts::default()
    }
}

/// One step of a pagination state machine.
///
/// A step fetches at most one page, persists it with the updated cursor in
/// one transaction, and reports whether to continue (snooze) or stop
/// (complete). The running job owns the athlete's cursor exclusively.
#[async_trait::async_trait]
pub trait SyncStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Advance one page for the athlete.
    async fn step(&self, mgr: &ManagerInner, athlete_id: i64) -> AppResult<JobOutcome>;
}

/// Handler for [`KIND`]; delegates to the configured strategy.
pub struct AthleteSyncHandler {
    mgr: Arc<ManagerInner>,
    strategy: Arc<dyn SyncStrategy>,
}

impl AthleteSyncHandler {
    pub(crate) fn new(mgr: Arc<ManagerInner>, strategy: Arc<dyn SyncStrategy>) -> Self {
        Self { mgr, strategy }
    }
}

#[async_trait::async_trait]
impl JobHandler for AthleteSyncHandler {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn work(&self, job: &Job) -> AppResult<JobOutcome> {
        let Ok(args) = serde_json::from_value::<AthleteSyncArgs>(job.args.clone()) else {
            error!(job_id = job.id, "undecodable sync payload, job abandoned");
            return Ok(JobOutcome::CompleteWith("invalid payload, job abandoned".into()));
        };

        tracing::debug!(
            strategy = self.strategy.name(),
            athlete_id = args.athlete_id,
            "sync step"
        );
        self.strategy.step(&self.mgr, args.athlete_id).await
    }
}
