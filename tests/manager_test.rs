//! Manager Facade Integration Tests
//!
//! Exercises the public enqueue operations, the pause/resume control plane,
//! and webhook routing through the composed [`Manager`].

use chrono::{Duration, Utc};
use hugel_sync::admission::RateAdmission;
use hugel_sync::config::EngineConfig;
use hugel_sync::models::{ActivitySource, AspectType, ObjectType, WebhookEvent};
use hugel_sync::queue::{JobQueue, MemoryQueue, Priority};
use hugel_sync::scheduler::{Manager, Options, QUEUE_STRAVA};
use hugel_sync::test_utils::{MemoryStore, ScriptedApi};
use std::collections::HashMap;
use std::sync::Arc;

struct Harness {
    manager: Manager,
    queue: Arc<MemoryQueue>,
}

fn harness() -> Harness {
    let queue = Arc::new(MemoryQueue::new());
    let manager = Manager::new(Options {
        config: EngineConfig::default(),
        queue: Arc::clone(&queue) as Arc<dyn JobQueue>,
        store: Arc::new(MemoryStore::new()),
        api: Arc::new(ScriptedApi::new()),
        admission: Arc::new(RateAdmission::new()),
    });
    Harness { manager, queue }
}

fn create_event(object_id: i64, owner_id: i64) -> WebhookEvent {
    WebhookEvent {
        object_type: ObjectType::Activity,
        aspect_type: AspectType::Create,
        object_id,
        owner_id,
        updates: HashMap::new(),
        event_time: Utc::now().timestamp(),
    }
}

#[tokio::test]
async fn forward_load_enqueue_is_idempotent() {
    let h = harness();

    let first = h.manager.enqueue_forward_load(7).await.unwrap();
    let second = h.manager.enqueue_forward_load(7).await.unwrap();
    assert!(first);
    assert!(!second, "second enqueue within the dedup window inserts nothing");

    let pending = h.queue.list_kind("athlete_sync").await.unwrap();
    assert_eq!(pending.len(), 1, "exactly one pending job per athlete");

    // A different athlete is a different unique key.
    assert!(h.manager.enqueue_forward_load(8).await.unwrap());
}

#[tokio::test]
async fn manual_fetch_enqueue_dedups_by_args() {
    let h = harness();

    let first = h
        .manager
        .enqueue_fetch_activity(7, 11, ActivitySource::Manual, Priority::Highest)
        .await
        .unwrap();
    let second = h
        .manager
        .enqueue_fetch_activity(7, 11, ActivitySource::Manual, Priority::Highest)
        .await
        .unwrap();
    assert!(first);
    assert!(!second);

    // A different source hashes differently and may coexist.
    let webhook = h
        .manager
        .enqueue_fetch_activity(7, 11, ActivitySource::Webhook, Priority::Low)
        .await
        .unwrap();
    assert!(webhook);
}

#[tokio::test]
async fn double_pause_schedules_one_resume() {
    let h = harness();
    let until = Utc::now() + Duration::minutes(15);

    let first = h.manager.pause(QUEUE_STRAVA, until, "quota").await.unwrap();
    let second = h.manager.pause(QUEUE_STRAVA, until, "quota").await.unwrap();
    assert!(first);
    assert!(!second, "pausing a paused queue is a no-op");

    let resumes = h.queue.list_kind("resume").await.unwrap();
    assert_eq!(resumes.len(), 1, "no extra resume job on the second pause");
    assert!(h.queue.pause_state(QUEUE_STRAVA).await.unwrap().is_some());

    assert!(h.manager.resume(QUEUE_STRAVA).await.unwrap());
    assert!(h.queue.pause_state(QUEUE_STRAVA).await.unwrap().is_none());
}

#[tokio::test]
async fn webhook_create_schedules_delayed_low_priority_fetch() {
    let h = harness();
    let before = Utc::now();

    let inserted = h.manager.handle_webhook_event(&create_event(11, 7)).await.unwrap();
    assert!(inserted);

    let fetches = h.queue.list_kind("fetch_activity").await.unwrap();
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].priority, Priority::Low);
    assert!(
        fetches[0].scheduled_at >= before + Duration::minutes(30),
        "upstream needs time to populate segments"
    );

    // Redelivery of the same event inserts nothing new.
    let redelivered = h.manager.handle_webhook_event(&create_event(11, 7)).await.unwrap();
    assert!(!redelivered);
    assert_eq!(h.queue.list_kind("fetch_activity").await.unwrap().len(), 1);
}

#[tokio::test]
async fn maintenance_enqueues_run_once_per_window() {
    let h = harness();

    assert!(h.manager.enqueue_refresh_views().await.unwrap());
    assert!(!h.manager.enqueue_refresh_views().await.unwrap());

    assert!(h.manager.enqueue_reload_segments().await.unwrap());
    assert!(!h.manager.enqueue_reload_segments().await.unwrap());

    assert!(h.manager.enqueue_garbage_collect().await.unwrap());
    assert!(!h.manager.enqueue_garbage_collect().await.unwrap());
}
