//! Engine Runtime Integration Tests
//!
//! Starts the real worker loops against in-memory collaborators and waits for
//! jobs to flow through lease, execution, and finalization.

use chrono::Utc;
use hugel_sync::admission::RateAdmission;
use hugel_sync::config::EngineConfig;
use hugel_sync::models::ActivitySource;
use hugel_sync::queue::{JobQueue, JobState, MemoryQueue, Priority};
use hugel_sync::scheduler::{Manager, Options};
use hugel_sync::store::Store;
use hugel_sync::test_utils::{effort, login, ride_detail, MemoryStore, ScriptedApi};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    manager: Manager,
    queue: Arc<MemoryQueue>,
    store: Arc<MemoryStore>,
    api: Arc<ScriptedApi>,
}

fn harness() -> Harness {
    let queue = Arc::new(MemoryQueue::new());
    let store = Arc::new(MemoryStore::new());
    let api = Arc::new(ScriptedApi::new());
    let config = EngineConfig {
        poll_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    };
    let manager = Manager::new(Options {
        config,
        queue: Arc::clone(&queue) as Arc<dyn JobQueue>,
        store: Arc::clone(&store) as Arc<dyn Store>,
        api: Arc::clone(&api) as Arc<dyn hugel_sync::upstream::FitnessApi>,
        admission: Arc::new(RateAdmission::new()),
    });
    Harness {
        manager,
        queue,
        store,
        api,
    }
}

/// Poll `check` until it passes or five seconds elapse.
async fn wait_for<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_job_flows_from_enqueue_to_persisted_detail() {
    let h = harness();
    h.store.add_login(login(7));
    h.api
        .push_detail(11, Ok(ride_detail(11, 7, Utc::now(), vec![effort(1, 7, 100, Utc::now())])));

    h.manager.start();
    h.manager
        .enqueue_fetch_activity(7, 11, ActivitySource::Manual, Priority::Highest)
        .await
        .unwrap();

    let store = Arc::clone(&h.store);
    wait_for("detail row to land", move || store.summary(11).is_some()).await;

    let jobs = h.queue.list_kind("fetch_activity").await.unwrap();
    let queue = Arc::clone(&h.queue);
    wait_for("job to finalize", move || {
        let jobs = futures_block(queue.list_kind("fetch_activity")).unwrap();
        jobs.iter().all(|job| job.state == JobState::Completed)
    })
    .await;
    assert_eq!(jobs.len(), 1);

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forward_load_completes_on_empty_page() {
    let h = harness();
    h.store.add_login(login(7));
    // The scripted listing returns empty pages by default.

    h.manager.start();
    h.manager.enqueue_forward_load(7).await.unwrap();

    let store = Arc::clone(&h.store);
    wait_for("cursor to complete", move || {
        futures_block(store.get_sync_cursor(7))
            .ok()
            .flatten()
            .is_some_and(|cursor| cursor.last_load_complete)
    })
    .await;

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_stops_the_loops() {
    let h = harness();
    h.manager.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), h.manager.shutdown())
        .await
        .expect("shutdown must not hang");
}

/// Run a small future to completion from a sync closure.
fn futures_block<F: std::future::Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
