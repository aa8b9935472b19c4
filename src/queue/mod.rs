// ABOUTME: Leasable job queue abstraction with priorities, uniqueness, and snooze
// ABOUTME: Job model, enqueue options, and the JobQueue trait the engine runs on
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Job Queue
//!
//! A persistent, leasable queue is the engine's backbone: every unit of sync
//! work is a [`Job`] with a kind tag and a JSON payload. The queue guarantees
//! at-most-one-pending-instance semantics through unique keys, orders leasing
//! by priority then schedule time, and is the only cross-worker mutual
//! exclusion in the system; workers never share in-process locks.
//!
//! Three things can happen to a leased job: it completes, it snoozes (a
//! non-failing reschedule that does not consume an attempt), or it fails and
//! is retried with backoff until `max_attempts`, after which the engine
//! discards it but leaves it listable for manual inspection.

/// In-memory queue implementation.
pub mod memory;

pub use memory::MemoryQueue;

use crate::errors::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Scheduling priority; lower rank leases first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Admin-triggered refreshes.
    Highest,
    /// Recent or large rides.
    High,
    /// Routine work.
    Default,
    /// Routine background work.
    Low,
    /// Webhook-originated bulk backfill.
    Lowest,
}

impl Priority {
    /// Numeric rank, 1 runs first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Highest => 1,
            Self::High => 2,
            Self::Default => 3,
            Self::Low => 4,
            Self::Lowest => 5,
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for its schedule time and a free worker.
    Available,
    /// Leased by a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Exceeded max attempts; kept for inspection.
    Discarded,
    /// Explicitly cancelled.
    Cancelled,
}

impl JobState {
    /// Completed, discarded, or cancelled.
    #[must_use]
    pub const fn is_finalized(self) -> bool {
        matches!(self, Self::Completed | Self::Discarded | Self::Cancelled)
    }
}

/// One unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Queue-assigned id.
    pub id: i64,
    /// Kind tag selecting the handler.
    pub kind: String,
    /// JSON payload.
    pub args: serde_json::Value,
    /// Named queue.
    pub queue: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Dedup key (kind + args hash) when unique enqueue was requested.
    pub unique_key: Option<String>,
    /// Current state.
    pub state: JobState,
    /// Attempts consumed so far (incremented on lease, refunded on snooze).
    pub attempt: u32,
    /// Attempts before the engine discards the job.
    pub max_attempts: u32,
    /// Earliest instant the job may be leased.
    pub scheduled_at: DateTime<Utc>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Last lease time.
    pub attempted_at: Option<DateTime<Utc>>,
    /// When the job reached a finalized state.
    pub finalized_at: Option<DateTime<Utc>>,
    /// Error text of the most recent failed attempt.
    pub last_error: Option<String>,
    /// Free-form labels (athlete/activity ids) for operators.
    pub tags: Vec<String>,
    /// Output note recorded at completion.
    pub note: Option<String>,
}

/// Options for one enqueue call. Each job kind supplies its own defaults.
#[derive(Debug, Clone)]
pub struct EnqueueOpts {
    /// Target queue.
    pub queue: String,
    /// Priority tier.
    pub priority: Priority,
    /// Retry budget.
    pub max_attempts: u32,
    /// Suppress insertion when an equivalent non-finalized job exists.
    pub unique_by_args: bool,
    /// Bound the uniqueness check to jobs created within this window.
    pub unique_period: Option<Duration>,
    /// Run no earlier than this instant.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Operator labels.
    pub tags: Vec<String>,
}

impl Default for EnqueueOpts {
    fn default() -> Self {
        Self {
            queue: "default".into(),
            priority: Priority::Default,
            max_attempts: 25,
            unique_by_args: false,
            unique_period: None,
            scheduled_at: None,
            tags: Vec::new(),
        }
    }
}

impl EnqueueOpts {
    /// Override the schedule time.
    #[must_use]
    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(when);
        self
    }

    /// Override the priority tier.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy)]
pub struct Enqueued {
    /// Id of the inserted or already-pending job.
    pub job_id: i64,
    /// False when uniqueness suppressed the insert.
    pub inserted: bool,
}

/// Pause bookkeeping for a named queue.
#[derive(Debug, Clone, Copy)]
pub struct QueuePauseState {
    /// When leasing stopped.
    pub paused_at: DateTime<Utc>,
}

/// Compute the dedup key for a kind and payload.
#[must_use]
pub fn unique_key(kind: &str, args: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b":");
    hasher.update(args.to_string().as_bytes());
    format!("{kind}:{}", hex::encode(hasher.finalize()))
}

/// Persistent leasable job queue.
///
/// The lease operation must be atomic: two workers calling [`Self::lease`]
/// concurrently can never receive the same job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a job unless uniqueness suppresses it. Suppression is reported
    /// through [`Enqueued::inserted`], never as an error.
    async fn enqueue(
        &self,
        kind: &str,
        args: serde_json::Value,
        opts: EnqueueOpts,
    ) -> AppResult<Enqueued>;

    /// Atomically claim the runnable job with the best (priority,
    /// `scheduled_at`) order from `queue`, if any and the queue is not
    /// paused.
    async fn lease(&self, queue: &str, now: DateTime<Utc>) -> AppResult<Option<Job>>;

    /// Finalize a leased job as completed.
    async fn complete(&self, job_id: i64, note: Option<String>) -> AppResult<()>;

    /// Reschedule a leased job without consuming its attempt.
    async fn snooze(&self, job_id: i64, until: DateTime<Utc>) -> AppResult<()>;

    /// Record a failed attempt. Reschedules at `retry_at` or discards once
    /// attempts are exhausted; returns the resulting state.
    async fn fail(&self, job_id: i64, error: &str, retry_at: DateTime<Utc>)
        -> AppResult<JobState>;

    /// Stop leasing from a queue. Returns false when it was already paused.
    async fn pause(&self, queue: &str, now: DateTime<Utc>) -> AppResult<bool>;

    /// Resume leasing. Returns false when the queue was not paused.
    async fn resume(&self, queue: &str) -> AppResult<bool>;

    /// Current pause state of a queue.
    async fn pause_state(&self, queue: &str) -> AppResult<Option<QueuePauseState>>;

    /// Fetch one job by id.
    async fn get(&self, job_id: i64) -> AppResult<Option<Job>>;

    /// Jobs of the given kinds finalized before `cutoff`, ordered by
    /// finalization time, starting after the cursor id, at most `limit`.
    async fn list_finalized(
        &self,
        kinds: &[&str],
        cutoff: DateTime<Utc>,
        after_id: Option<i64>,
        limit: usize,
    ) -> AppResult<Vec<Job>>;

    /// All jobs of one kind, any state. Diagnostic surface.
    async fn list_kind(&self, kind: &str) -> AppResult<Vec<Job>>;

    /// Permanently delete a finalized job. Returns false when absent.
    async fn delete(&self, job_id: i64) -> AppResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::{unique_key, JobState, Priority};

    #[test]
    fn priority_order() {
        assert!(Priority::Highest.rank() < Priority::High.rank());
        assert!(Priority::High.rank() < Priority::Default.rank());
        assert!(Priority::Default.rank() < Priority::Low.rank());
        assert!(Priority::Low.rank() < Priority::Lowest.rank());
    }

    #[test]
    fn finalized_states() {
        assert!(JobState::Completed.is_finalized());
        assert!(JobState::Discarded.is_finalized());
        assert!(JobState::Cancelled.is_finalized());
        assert!(!JobState::Available.is_finalized());
        assert!(!JobState::Running.is_finalized());
    }

    #[test]
    fn unique_key_depends_on_kind_and_args() {
        let a = unique_key("fetch_activity", &serde_json::json!({"activity_id": 1}));
        let b = unique_key("fetch_activity", &serde_json::json!({"activity_id": 2}));
        let c = unique_key("update_activity", &serde_json::json!({"activity_id": 1}));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            a,
            unique_key("fetch_activity", &serde_json::json!({"activity_id": 1}))
        );
    }
}
