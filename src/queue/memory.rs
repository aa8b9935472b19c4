// ABOUTME: In-memory JobQueue with atomic leasing, uniqueness, and pause state
// ABOUTME: Backs the engine runtime in tests and single-process deployments
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

use super::{Enqueued, EnqueueOpts, Job, JobQueue, JobState, QueuePauseState};
use crate::errors::AppResult;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-memory [`JobQueue`].
///
/// One mutex guards the job table; every trait method is a single short
/// critical section, which is what makes [`JobQueue::lease`] atomic across
/// workers.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    paused: DashMap<String, QueuePauseState>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    jobs: BTreeMap<i64, Job>,
}

impl MemoryQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("queue lock poisoned"))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(
        &self,
        kind: &str,
        args: serde_json::Value,
        opts: EnqueueOpts,
    ) -> AppResult<Enqueued> {
        let now = Utc::now();
        let unique_key = opts.unique_by_args.then(|| super::unique_key(kind, &args));

        let mut inner = self.lock()?;

        if let Some(key) = &unique_key {
            let duplicate = inner.jobs.values().find(|job| {
                job.unique_key.as_deref() == Some(key.as_str())
                    && !job.state.is_finalized()
                    && opts
                        .unique_period
                        .is_none_or(|period| job.created_at >= now - period)
            });
            if let Some(existing) = duplicate {
                return Ok(Enqueued {
                    job_id: existing.id,
                    inserted: false,
                });
            }
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let job = Job {
            id,
            kind: kind.to_owned(),
            args,
            queue: opts.queue,
            priority: opts.priority,
            unique_key,
            state: JobState::Available,
            attempt: 0,
            max_attempts: opts.max_attempts,
            scheduled_at: opts.scheduled_at.unwrap_or(now),
            created_at: now,
            attempted_at: None,
            finalized_at: None,
            last_error: None,
            tags: opts.tags,
            note: None,
        };
        inner.jobs.insert(id, job);

        Ok(Enqueued {
            job_id: id,
            inserted: true,
        })
    }

    async fn lease(&self, queue: &str, now: DateTime<Utc>) -> AppResult<Option<Job>> {
        if self.paused.contains_key(queue) {
            return Ok(None);
        }

        let mut inner = self.lock()?;
        let candidate = inner
            .jobs
            .values()
            .filter(|job| {
                job.queue == queue && job.state == JobState::Available && job.scheduled_at <= now
            })
            .min_by_key(|job| (job.priority.rank(), job.scheduled_at, job.id))
            .map(|job| job.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("leased job {id} vanished"))?;
        job.state = JobState::Running;
        job.attempt += 1;
        job.attempted_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: i64, note: Option<String>) -> AppResult<()> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("complete: unknown job {job_id}"))?;
        job.state = JobState::Completed;
        job.finalized_at = Some(Utc::now());
        job.note = note;
        Ok(())
    }

    async fn snooze(&self, job_id: i64, until: DateTime<Utc>) -> AppResult<()> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("snooze: unknown job {job_id}"))?;
        job.state = JobState::Available;
        job.scheduled_at = until;
        // A snooze is not a failed attempt; refund the lease's increment.
        job.attempt = job.attempt.saturating_sub(1);
        Ok(())
    }

    async fn fail(
        &self,
        job_id: i64,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> AppResult<JobState> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("fail: unknown job {job_id}"))?;
        job.last_error = Some(error.to_owned());

        if job.attempt >= job.max_attempts {
            job.state = JobState::Discarded;
            job.finalized_at = Some(Utc::now());
        } else {
            job.state = JobState::Available;
            job.scheduled_at = retry_at;
        }
        Ok(job.state)
    }

    async fn pause(&self, queue: &str, now: DateTime<Utc>) -> AppResult<bool> {
        if self.paused.contains_key(queue) {
            return Ok(false);
        }
        self.paused
            .insert(queue.to_owned(), QueuePauseState { paused_at: now });
        Ok(true)
    }

    async fn resume(&self, queue: &str) -> AppResult<bool> {
        Ok(self.paused.remove(queue).is_some())
    }

    async fn pause_state(&self, queue: &str) -> AppResult<Option<QueuePauseState>> {
        Ok(self.paused.get(queue).map(|entry| *entry.value()))
    }

    async fn get(&self, job_id: i64) -> AppResult<Option<Job>> {
        Ok(self.lock()?.jobs.get(&job_id).cloned())
    }

    async fn list_finalized(
        &self,
        kinds: &[&str],
        cutoff: DateTime<Utc>,
        after_id: Option<i64>,
        limit: usize,
    ) -> AppResult<Vec<Job>> {
        let inner = self.lock()?;
        let mut finalized: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| {
                kinds.contains(&job.kind.as_str())
                    && job
                        .finalized_at
                        .is_some_and(|finalized_at| finalized_at < cutoff)
            })
            .cloned()
            .collect();
        finalized.sort_by_key(|job| (job.finalized_at, job.id));

        let start = after_id
            .and_then(|id| finalized.iter().position(|job| job.id == id).map(|i| i + 1))
            .unwrap_or(0);
        Ok(finalized.into_iter().skip(start).take(limit).collect())
    }

    async fn list_kind(&self, kind: &str) -> AppResult<Vec<Job>> {
        let inner = self.lock()?;
        Ok(inner
            .jobs
            .values()
            .filter(|job| job.kind == kind)
            .cloned()
            .collect())
    }

    async fn delete(&self, job_id: i64) -> AppResult<bool> {
        Ok(self.lock()?.jobs.remove(&job_id).is_some())
    }
}

#[cfg(test)]
impl MemoryQueue {
    /// Rewrite a job's finalization time; retention tests need old jobs.
    pub(crate) fn backdate_finalized(&self, job_id: i64, at: DateTime<Utc>) {
        if let Ok(mut inner) = self.lock() {
            if let Some(job) = inner.jobs.get_mut(&job_id) {
                job.finalized_at = Some(at);
            }
        }
    }
}
