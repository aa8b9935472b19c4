// ABOUTME: Scheduler engine and manager facade composing queue, store, and upstream API
// ABOUTME: Worker loops, retry backoff, periodic jobs, and global snooze policy
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Scheduler
//!
//! One [`Manager`] owns the whole pipeline: per-queue worker loops lease jobs
//! from the [`JobQueue`](crate::queue::JobQueue), dispatch them to registered
//! [`JobHandler`]s, and apply the three-way outcome contract (complete /
//! snooze / retry-with-backoff). The manager also owns every background loop
//! (periodic enqueues and the stats sampler) and stops them cooperatively on
//! shutdown; nothing here is fire-and-forget.
//!
//! Job kinds each live in their own file, declaring their queue, priority
//! tier, uniqueness window, and retry budget next to their handler.

/// Athlete pagination sync job (forward and back strategies).
pub mod athlete_sync;

/// Back-load pagination strategy (legacy, retained).
pub mod back_load;

/// Detail fetch job for one activity.
pub mod fetch_activity;

/// Forward-load pagination strategy (canonical).
pub mod forward_load;

/// Bounded garbage-collection sweep of finalized jobs.
pub mod garbage;

/// Periodic sweep enqueuing athlete sync jobs that are due.
pub mod load_finder;

/// Queue pause/resume control plane.
pub mod pause;

/// Leaderboard materialized view refresh job.
pub mod refresh_views;

/// Competitive segment reload job.
pub mod segments;

/// Webhook-driven update jobs with typed update variants.
pub mod update_activity;

/// Inbound webhook event routing.
pub mod webhook;

use crate::admission::RateAdmission;
use crate::config::{EngineConfig, SyncStrategyKind};
use crate::debounce::Debouncer;
use crate::errors::AppResult;
use crate::models::{ActivitySource, WebhookEvent};
use crate::queue::{Job, JobQueue, JobState, Priority};
use crate::store::Store;
use crate::upstream::FitnessApi;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Queue for detail fetches against the upstream API.
pub const QUEUE_STRAVA: &str = "strava_queue";

/// Queue for athlete pagination loads.
pub const QUEUE_BACKLOAD: &str = "backload_queue";

/// Queue for pause/resume control jobs.
pub const QUEUE_CONTROL: &str = "control_queue";

/// Queue for database-only jobs (updates, views, GC).
pub const QUEUE_DATABASE: &str = "database_operations_queue";

/// How long paused queues sleep after a quota or maintenance event.
const GLOBAL_SNOOZE: Duration = Duration::from_secs(15 * 60);

/// Default per-job execution timeout.
const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(120);

/// How often the stats sampler runs.
const SAMPLER_INTERVAL: Duration = Duration::from_secs(8 * 60);

/// What a handler wants done with its job.
#[derive(Debug)]
pub enum JobOutcome {
    /// Finalize as success.
    Complete,
    /// Finalize as success with an output note.
    CompleteWith(String),
    /// Reschedule without consuming an attempt.
    Snooze(Duration),
}

/// One registered job kind.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    /// Kind tag this handler serves.
    fn kind(&self) -> &'static str;

    /// Execution timeout; the engine fails the attempt when exceeded.
    fn timeout(&self) -> Duration {
        DEFAULT_JOB_TIMEOUT
    }

    /// Do the work. `Err` means an engine-managed retry.
    async fn work(&self, job: &Job) -> AppResult<JobOutcome>;
}

/// Gauges sampled from the store in the background.
#[derive(Debug, Default)]
pub struct EngineStats {
    activity_details: AtomicI64,
    ride_summaries: AtomicI64,
}

impl EngineStats {
    /// Latest sampled (detail rows, ride summary rows).
    #[must_use]
    pub fn snapshot(&self) -> (i64, i64) {
        (
            self.activity_details.load(Ordering::Relaxed),
            self.ride_summaries.load(Ordering::Relaxed),
        )
    }
}

/// Shared state handed to every handler.
pub struct ManagerInner {
    pub(crate) config: EngineConfig,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) api: Arc<dyn FitnessApi>,
    pub(crate) admission: Arc<RateAdmission>,
    pub(crate) rate_limit_log: Debouncer,
    pub(crate) stats: EngineStats,
}

impl ManagerInner {
    /// Pause the API-facing queues and snooze the calling job. Used when the
    /// shared quota is exhausted: one denied call means every queued call
    /// would be denied too.
    pub(crate) async fn quota_snooze(&self) -> AppResult<JobOutcome> {
        let until = Utc::now() + ChronoDuration::from_std(GLOBAL_SNOOZE)?;
        self.pause_queue(QUEUE_STRAVA, until, "upstream rate limit").await?;
        self.pause_queue(QUEUE_BACKLOAD, until, "upstream rate limit").await?;
        Ok(JobOutcome::Snooze(GLOBAL_SNOOZE))
    }

    /// Same as [`Self::quota_snooze`] but for platform-wide maintenance.
    pub(crate) async fn maintenance_snooze(&self, reason: &str) -> AppResult<JobOutcome> {
        warn!(reason, "upstream is offline or in maintenance");
        let until = Utc::now() + ChronoDuration::from_std(GLOBAL_SNOOZE)?;
        self.pause_queue(QUEUE_STRAVA, until, reason).await?;
        self.pause_queue(QUEUE_BACKLOAD, until, reason).await?;
        Ok(JobOutcome::Snooze(GLOBAL_SNOOZE))
    }

    /// Pause one queue until `until`. Idempotent: an already-paused queue is
    /// left alone and no second resume job is inserted.
    pub(crate) async fn pause_queue(
        &self,
        queue: &str,
        until: DateTime<Utc>,
        reason: &str,
    ) -> AppResult<bool> {
        let now = Utc::now();
        if !self.queue.pause(queue, now).await? {
            return Ok(false);
        }
        info!(queue, %until, reason, "queue paused");
        pause::enqueue_resume(self, queue, until).await?;
        Ok(true)
    }

    /// Enqueue a detail fetch for one activity.
    pub(crate) async fn enqueue_fetch_activity(
        &self,
        args: &fetch_activity::FetchActivityArgs,
        priority: Priority,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> AppResult<bool> {
        let mut opts = fetch_activity::enqueue_opts(args).with_priority(priority);
        if let Some(at) = scheduled_at {
            opts = opts.at(at);
        }
        let enqueued = self
            .queue
            .enqueue(fetch_activity::KIND, serde_json::to_value(args)?, opts)
            .await?;
        Ok(enqueued.inserted)
    }

    /// Enqueue an athlete pagination sync.
    pub(crate) async fn enqueue_athlete_sync(
        &self,
        athlete_id: i64,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> AppResult<bool> {
        let args = athlete_sync::AthleteSyncArgs { athlete_id };
        let mut opts = athlete_sync::enqueue_opts(&args);
        if let Some(at) = scheduled_at {
            opts = opts.at(at);
        }
        let enqueued = self
            .queue
            .enqueue(athlete_sync::KIND, serde_json::to_value(&args)?, opts)
            .await?;
        Ok(enqueued.inserted)
    }

    /// Enqueue a webhook-driven update job.
    pub(crate) async fn enqueue_update_hook(
        &self,
        op: update_activity::HookOp,
        event: &WebhookEvent,
    ) -> AppResult<bool> {
        let args = update_activity::UpdateHookArgs {
            op,
            event: event.clone(),
        };
        let enqueued = self
            .queue
            .enqueue(
                update_activity::KIND,
                serde_json::to_value(&args)?,
                update_activity::enqueue_opts(),
            )
            .await?;
        Ok(enqueued.inserted)
    }
}

/// Everything needed to build a [`Manager`].
pub struct Options {
    /// Engine configuration.
    pub config: EngineConfig,
    /// Leasable job queue.
    pub queue: Arc<dyn JobQueue>,
    /// Transactional domain store.
    pub store: Arc<dyn Store>,
    /// Upstream API client.
    pub api: Arc<dyn FitnessApi>,
    /// Injected admission state (one per external quota).
    pub admission: Arc<RateAdmission>,
}

/// Facade composing the whole scheduling pipeline.
pub struct Manager {
    inner: Arc<ManagerInner>,
    handlers: Arc<HashMap<&'static str, Arc<dyn JobHandler>>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Manager {
    /// Build the manager and register every job kind. Nothing runs until
    /// [`Self::start`].
    #[must_use]
    pub fn new(options: Options) -> Self {
        let inner = Arc::new(ManagerInner {
            config: options.config,
            queue: options.queue,
            store: options.store,
            api: options.api,
            admission: options.admission,
            rate_limit_log: Debouncer::new(Duration::from_secs(7 * 60)),
            stats: EngineStats::default(),
        });

        let strategy: Arc<dyn athlete_sync::SyncStrategy> = match inner.config.sync_strategy {
            SyncStrategyKind::Forward => Arc::new(forward_load::ForwardLoad),
            SyncStrategyKind::Back => Arc::new(back_load::BackLoad),
        };

        let handler_list: Vec<Arc<dyn JobHandler>> = vec![
            Arc::new(fetch_activity::FetchActivityHandler::new(Arc::clone(&inner))),
            Arc::new(athlete_sync::AthleteSyncHandler::new(Arc::clone(&inner), strategy)),
            Arc::new(update_activity::UpdateHookHandler::new(Arc::clone(&inner))),
            Arc::new(pause::ResumeHandler::new(Arc::clone(&inner))),
            Arc::new(garbage::GarbageCollectHandler::new(Arc::clone(&inner))),
            Arc::new(refresh_views::RefreshViewsHandler::new(Arc::clone(&inner))),
            Arc::new(segments::ReloadSegmentsHandler::new(Arc::clone(&inner))),
            Arc::new(load_finder::LoadFinderHandler::new(Arc::clone(&inner))),
        ];
        let handlers = handler_list
            .into_iter()
            .map(|handler| (handler.kind(), handler))
            .collect();

        let (shutdown, _) = watch::channel(false);
        Self {
            inner,
            handlers: Arc::new(handlers),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn worker loops, the periodic schedule, and the stats sampler.
    pub fn start(&self) {
        let workers = self.inner.config.workers;
        let queues = [
            (QUEUE_STRAVA, workers.strava),
            (QUEUE_BACKLOAD, workers.backload),
            (QUEUE_CONTROL, workers.control),
            (QUEUE_DATABASE, workers.database),
        ];

        let mut tasks = Vec::new();
        for (queue, count) in queues {
            for _ in 0..count {
                tasks.push(tokio::spawn(worker_loop(
                    Arc::clone(&self.inner),
                    Arc::clone(&self.handlers),
                    queue,
                    self.shutdown.subscribe(),
                )));
            }
        }

        tasks.push(tokio::spawn(periodic_loop(
            Arc::clone(&self.inner),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(sampler_loop(
            Arc::clone(&self.inner),
            self.shutdown.subscribe(),
        )));

        if let Ok(mut held) = self.tasks.lock() {
            held.extend(tasks);
        }
        info!("scheduler started");
    }

    /// Signal every background loop and wait for them to drain. In-flight
    /// upstream calls are not aborted; loops stop at their next iteration
    /// boundary.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let drained = self.tasks.lock().map(|mut held| held.drain(..).collect::<Vec<_>>());
        if let Ok(tasks) = drained {
            for task in tasks {
                let _ = task.await;
            }
        }
        info!("scheduler stopped");
    }

    /// Latest background-sampled gauges.
    #[must_use]
    pub fn stats(&self) -> (i64, i64) {
        self.inner.stats.snapshot()
    }

    /// Enqueue a detail fetch. Returns false when an equivalent job is
    /// already pending.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the insert.
    pub async fn enqueue_fetch_activity(
        &self,
        athlete_id: i64,
        activity_id: i64,
        source: ActivitySource,
        priority: Priority,
    ) -> AppResult<bool> {
        let args = fetch_activity::FetchActivityArgs {
            source,
            activity_id,
            athlete_id,
            hugel_potential: true,
            on_event_dates: true,
        };
        self.inner.enqueue_fetch_activity(&args, priority, None).await
    }

    /// Enqueue a pagination load for one athlete.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the insert.
    pub async fn enqueue_forward_load(&self, athlete_id: i64) -> AppResult<bool> {
        self.inner.enqueue_athlete_sync(athlete_id, None).await
    }

    /// Enqueue a competitive segment reload.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the insert.
    pub async fn enqueue_reload_segments(&self) -> AppResult<bool> {
        segments::enqueue(&self.inner).await
    }

    /// Enqueue a leaderboard view refresh.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the insert.
    pub async fn enqueue_refresh_views(&self) -> AppResult<bool> {
        refresh_views::enqueue(&self.inner).await
    }

    /// Enqueue a garbage-collection sweep.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the insert.
    pub async fn enqueue_garbage_collect(&self) -> AppResult<bool> {
        garbage::enqueue(&self.inner).await
    }

    /// Pause a queue until `until`, scheduling the matching resume job.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the pause or the resume
    /// insert.
    pub async fn pause(&self, queue: &str, until: DateTime<Utc>, reason: &str) -> AppResult<bool> {
        self.inner.pause_queue(queue, until, reason).await
    }

    /// Resume a paused queue immediately.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the resume.
    pub async fn resume(&self, queue: &str) -> AppResult<bool> {
        self.inner.queue.resume(queue).await
    }

    /// Route one inbound webhook event into scheduler jobs. See
    /// [`webhook`] for the dispatch table.
    ///
    /// # Errors
    ///
    /// Never fails for enqueue problems; those are logged so the delivery
    /// system can be acknowledged regardless.
    pub async fn handle_webhook_event(&self, event: &WebhookEvent) -> AppResult<bool> {
        webhook::route(&self.inner, event).await
    }
}

/// Exponential retry backoff with jitter for failed attempts.
fn retry_backoff(attempt: u32) -> ChronoDuration {
    let base = i64::from(attempt.min(18)).pow(4).clamp(1, 24 * 60 * 60);
    let jitter = rand::thread_rng().gen_range(0..=base / 10 + 1);
    ChronoDuration::seconds(base + jitter)
}

async fn worker_loop(
    inner: Arc<ManagerInner>,
    handlers: Arc<HashMap<&'static str, Arc<dyn JobHandler>>>,
    queue: &'static str,
    mut shutdown: watch::Receiver<bool>,
) {
    let poll = inner.config.poll_interval;
    loop {
        if *shutdown.borrow() {
            break;
        }

        match inner.queue.lease(queue, Utc::now()).await {
            Ok(Some(job)) => execute_job(&inner, &handlers, job).await,
            Ok(None) => {
                tokio::select! {
                    () = tokio::time::sleep(poll) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(error) => {
                warn!(queue, %error, "lease failed");
                tokio::time::sleep(poll).await;
            }
        }
    }
    debug!(queue, "worker loop stopped");
}

async fn execute_job(
    inner: &Arc<ManagerInner>,
    handlers: &HashMap<&'static str, Arc<dyn JobHandler>>,
    job: Job,
) {
    let Some(handler) = handlers.get(job.kind.as_str()) else {
        error!(job_id = job.id, kind = %job.kind, "no handler registered");
        let retry_at = Utc::now() + retry_backoff(job.attempt);
        let _ = inner.queue.fail(job.id, "no handler registered", retry_at).await;
        return;
    };

    let started = std::time::Instant::now();
    let result = tokio::time::timeout(handler.timeout(), handler.work(&job)).await;
    let elapsed_ms = started.elapsed().as_millis();

    let finalize = match result {
        Ok(outcome) => outcome,
        Err(_) => Err(anyhow::anyhow!("job timed out after {:?}", handler.timeout())),
    };

    match finalize {
        Ok(JobOutcome::Complete) => {
            debug!(job_id = job.id, kind = %job.kind, elapsed_ms, "job completed");
            if let Err(error) = inner.queue.complete(job.id, None).await {
                error!(job_id = job.id, %error, "finalize failed");
            }
        }
        Ok(JobOutcome::CompleteWith(note)) => {
            debug!(job_id = job.id, kind = %job.kind, elapsed_ms, note = %note, "job completed");
            if let Err(error) = inner.queue.complete(job.id, Some(note)).await {
                error!(job_id = job.id, %error, "finalize failed");
            }
        }
        Ok(JobOutcome::Snooze(delay)) => {
            debug!(job_id = job.id, kind = %job.kind, ?delay, "job snoozed");
            let until = Utc::now()
                + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::minutes(15));
            if let Err(error) = inner.queue.snooze(job.id, until).await {
                error!(job_id = job.id, %error, "snooze failed");
            }
        }
        Err(work_error) => {
            let retry_at = Utc::now() + retry_backoff(job.attempt);
            match inner
                .queue
                .fail(job.id, &format!("{work_error:#}"), retry_at)
                .await
            {
                Ok(JobState::Discarded) => {
                    error!(
                        job_id = job.id,
                        kind = %job.kind,
                        attempt = job.attempt,
                        error = %work_error,
                        "job exceeded max attempts, discarded"
                    );
                }
                Ok(_) => {
                    warn!(
                        job_id = job.id,
                        kind = %job.kind,
                        attempt = job.attempt,
                        error = %work_error,
                        "job failed, will retry"
                    );
                }
                Err(error) => error!(job_id = job.id, %error, "fail bookkeeping failed"),
            }
        }
    }
}

/// One periodic entry: what to enqueue and how often.
struct PeriodicEntry {
    name: &'static str,
    every: Duration,
    run_on_start: bool,
    kind: PeriodicKind,
}

enum PeriodicKind {
    ResumeQueues,
    RefreshViews,
    ReloadSegments,
    GarbageCollect,
    LoadFinder,
}

async fn periodic_loop(inner: Arc<ManagerInner>, mut shutdown: watch::Receiver<bool>) {
    let entries = [
        // Dead-man's switch: paused queues always wake up eventually.
        PeriodicEntry {
            name: "resume_queues",
            every: Duration::from_secs(60 * 60),
            run_on_start: true,
            kind: PeriodicKind::ResumeQueues,
        },
        PeriodicEntry {
            name: "refresh_views",
            every: Duration::from_secs(6 * 60 * 60),
            run_on_start: false,
            kind: PeriodicKind::RefreshViews,
        },
        PeriodicEntry {
            name: "reload_segments",
            every: Duration::from_secs(60 * 60),
            run_on_start: true,
            kind: PeriodicKind::ReloadSegments,
        },
        PeriodicEntry {
            name: "garbage_collect",
            every: Duration::from_secs(24 * 60 * 60),
            run_on_start: false,
            kind: PeriodicKind::GarbageCollect,
        },
        PeriodicEntry {
            name: "load_finder",
            every: Duration::from_secs(30 * 60),
            run_on_start: true,
            kind: PeriodicKind::LoadFinder,
        },
    ];

    let mut next_due: Vec<std::time::Instant> = entries
        .iter()
        .map(|entry| {
            let now = std::time::Instant::now();
            if entry.run_on_start {
                now
            } else {
                now + entry.every
            }
        })
        .collect();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = std::time::Instant::now();
        for (entry, due) in entries.iter().zip(next_due.iter_mut()) {
            if now < *due {
                continue;
            }
            *due = now + entry.every;

            let result = match entry.kind {
                PeriodicKind::ResumeQueues => {
                    let now_ts = Utc::now();
                    let strava = pause::enqueue_resume(&inner, QUEUE_STRAVA, now_ts).await;
                    let backload = pause::enqueue_resume(&inner, QUEUE_BACKLOAD, now_ts).await;
                    strava.and(backload)
                }
                PeriodicKind::RefreshViews => refresh_views::enqueue(&inner).await,
                PeriodicKind::ReloadSegments => segments::enqueue(&inner).await,
                PeriodicKind::GarbageCollect => garbage::enqueue(&inner).await,
                PeriodicKind::LoadFinder => load_finder::enqueue(&inner).await,
            };
            if let Err(error) = result {
                warn!(job = entry.name, %error, "periodic enqueue failed");
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(30)) => {}
            _ = shutdown.changed() => {}
        }
    }
    debug!("periodic loop stopped");
}

async fn sampler_loop(inner: Arc<ManagerInner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Ok(details) = inner.store.total_activity_details().await {
            inner.stats.activity_details.store(details, Ordering::Relaxed);
        }
        if let Ok(summaries) = inner.store.total_ride_summaries().await {
            inner.stats.ride_summaries.store(summaries, Ordering::Relaxed);
        }
        let (details, summaries) = inner.stats.snapshot();
        debug!(details, summaries, "sampled store totals");

        tokio::select! {
            () = tokio::time::sleep(SAMPLER_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
    debug!("sampler loop stopped");
}


#[cfg(test)]
mod tests {
    use super::retry_backoff;
    use chrono::Duration;

    #[test]
    fn backoff_grows_and_caps() {
        let first = retry_backoff(1);
        assert!(first >= Duration::seconds(1));

        let tenth = retry_backoff(10);
        assert!(tenth >= Duration::seconds(10_000));

        let huge = retry_backoff(200);
        assert!(huge <= Duration::seconds(24 * 60 * 60 + 8641));
    }
}
