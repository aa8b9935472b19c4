// ABOUTME: Webhook event routing into scheduler jobs
// ABOUTME: Dispatch table keyed by object and aspect type, decoupled from polling
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Webhook Router
//!
//! Translates inbound platform events into jobs. Delivery is at-least-once
//! and must be acknowledged no matter what happens here, so enqueue failures
//! are logged and swallowed; re-delivery of the same event would only hit
//! the same unique keys anyway.

use super::fetch_activity::FetchActivityArgs;
use super::update_activity::HookOp;
use super::ManagerInner;
use crate::errors::AppResult;
use crate::models::{ActivitySource, AspectType, ObjectType, WebhookEvent};
use crate::queue::Priority;
use chrono::{Duration, Utc};
use tracing::{error, info, warn};

/// Route one event. Returns whether any new job was inserted.
pub(crate) async fn route(mgr: &ManagerInner, event: &WebhookEvent) -> AppResult<bool> {
    let outcome = match event.object_type {
        ObjectType::Activity => route_activity(mgr, event).await,
        ObjectType::Athlete => route_athlete(mgr, event).await,
        ObjectType::Unknown => {
            warn!(?event, "webhook event not supported");
            Ok(false)
        }
    };

    match outcome {
        Ok(inserted) => Ok(inserted),
        Err(enqueue_error) => {
            error!(
                owner_id = event.owner_id,
                object_id = event.object_id,
                %enqueue_error,
                "error enqueueing webhook job"
            );
            Ok(false)
        }
    }
}

async fn route_activity(mgr: &ManagerInner, event: &WebhookEvent) -> AppResult<bool> {
    match event.aspect_type {
        AspectType::Create => {
            // The webhook gives us no intel into the ride, so the potential
            // flag is optimistic. The delay lets upstream finish populating
            // segments before we spend a detail call.
            let args = FetchActivityArgs {
                source: ActivitySource::Webhook,
                activity_id: event.object_id,
                athlete_id: event.owner_id,
                hugel_potential: true,
                on_event_dates: true,
            };
            let at = Utc::now() + Duration::from_std(mgr.config.webhook_fetch_delay)?;
            mgr.enqueue_fetch_activity(&args, Priority::Low, Some(at)).await
        }
        AspectType::Update => mgr.enqueue_update_hook(HookOp::UpdateActivity, event).await,
        AspectType::Delete => {
            // Deletions are recorded but rows are retained.
            info!(deleted = ?event.updates, object_id = event.object_id,
                "'delete' webhook event to an activity");
            Ok(false)
        }
        AspectType::Unknown => {
            warn!(?event, "webhook aspect not supported");
            Ok(false)
        }
    }
}

async fn route_athlete(mgr: &ManagerInner, event: &WebhookEvent) -> AppResult<bool> {
    match event.aspect_type {
        AspectType::Update => mgr.enqueue_update_hook(HookOp::UpdateAthlete, event).await,
        AspectType::Create | AspectType::Delete => {
            warn!(?event, "webhook event to an athlete not handled");
            Ok(false)
        }
        AspectType::Unknown => {
            warn!(?event, "webhook aspect not supported");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::context;
    use super::super::{fetch_activity, update_activity};
    use super::route;
    use crate::models::{ActivitySource, AspectType, ObjectType, WebhookEvent};
    use crate::queue::{JobQueue, Priority};
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    fn event(object_type: ObjectType, aspect_type: AspectType) -> WebhookEvent {
        WebhookEvent {
            object_type,
            aspect_type,
            object_id: 11,
            owner_id: 7,
            updates: HashMap::new(),
            event_time: Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn activity_create_enqueues_one_delayed_low_fetch() {
        let ctx = context();
        let before = Utc::now();

        let inserted = route(&ctx.inner, &event(ObjectType::Activity, AspectType::Create))
            .await
            .unwrap();
        assert!(inserted);

        let fetches = ctx.queue.list_kind(fetch_activity::KIND).await.unwrap();
        assert_eq!(fetches.len(), 1);
        let job = &fetches[0];
        assert_eq!(job.priority, Priority::Low);
        assert!(job.scheduled_at >= before + Duration::minutes(30));

        let args: fetch_activity::FetchActivityArgs =
            serde_json::from_value(job.args.clone()).unwrap();
        assert_eq!(args.source, ActivitySource::Webhook);
        assert!(args.hugel_potential, "no content to decide otherwise yet");

        // At-least-once delivery: the same event re-routes without a second job.
        let inserted = route(&ctx.inner, &event(ObjectType::Activity, AspectType::Create))
            .await
            .unwrap();
        assert!(!inserted);
        assert_eq!(ctx.queue.list_kind(fetch_activity::KIND).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn activity_delete_is_logged_only() {
        let ctx = context();
        let inserted = route(&ctx.inner, &event(ObjectType::Activity, AspectType::Delete))
            .await
            .unwrap();
        assert!(!inserted);
        assert!(ctx.queue.list_kind(fetch_activity::KIND).await.unwrap().is_empty());
        assert!(ctx.queue.list_kind(update_activity::KIND).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activity_update_enqueues_hook_job() {
        let ctx = context();
        let inserted = route(&ctx.inner, &event(ObjectType::Activity, AspectType::Update))
            .await
            .unwrap();
        assert!(inserted);
        assert_eq!(ctx.queue.list_kind(update_activity::KIND).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn athlete_update_enqueues_hook_job() {
        let ctx = context();
        let inserted = route(&ctx.inner, &event(ObjectType::Athlete, AspectType::Update))
            .await
            .unwrap();
        assert!(inserted);
        assert_eq!(ctx.queue.list_kind(update_activity::KIND).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn athlete_create_and_delete_are_unhandled() {
        let ctx = context();
        for aspect in [AspectType::Create, AspectType::Delete] {
            let inserted = route(&ctx.inner, &event(ObjectType::Athlete, aspect)).await.unwrap();
            assert!(!inserted);
        }
        assert!(ctx.queue.list_kind(update_activity::KIND).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_object_is_ignored() {
        let ctx = context();
        let inserted = route(&ctx.inner, &event(ObjectType::Unknown, AspectType::Create))
            .await
            .unwrap();
        assert!(!inserted);
    }
}
