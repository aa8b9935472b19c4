// ABOUTME: Webhook-driven update jobs for activities and athletes
// ABOUTME: Closed typed update variants decoded from the platform's field map
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Hook Updates
//!
//! The platform delivers updates as a loose string map. This module decodes
//! that map into a closed set of typed variants before touching the store;
//! an unknown field is a typed error that fails the job and leaves it
//! visible for review, never a silent fallthrough.

use super::{JobHandler, JobOutcome, ManagerInner, QUEUE_DATABASE};
use crate::errors::{AppResult, SyncError};
use crate::models::{ObjectType, WebhookEvent};
use crate::queue::{EnqueueOpts, Job};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

/// Kind tag.
pub const KIND: &str = "update_activity";

/// Which update operation a hook job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookOp {
    /// Apply changed activity fields.
    UpdateActivity,
    /// Remove an activity (kept for parity; not routed today).
    DeleteActivity,
    /// Apply changed athlete fields.
    UpdateAthlete,
}

/// Payload: the operation plus the raw event it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateHookArgs {
    /// Operation selector.
    pub op: HookOp,
    /// The delivered event.
    pub event: WebhookEvent,
}

/// Kind defaults: database queue, small retry budget, short dedup window.
#[must_use]
pub fn enqueue_opts() -> EnqueueOpts {
    EnqueueOpts {
        queue: QUEUE_DATABASE.into(),
        max_attempts: 3,
        unique_by_args: true,
        unique_period: Some(Duration::minutes(5)),
        ..EnqueueOpts::default()
    }
}

/// A validated activity field change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityUpdate {
    /// Rename.
    Title(String),
    /// Activity/sport type change.
    SportType(String),
}

impl ActivityUpdate {
    /// Decode one map entry; unknown fields are rejected explicitly.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownUpdateField`] for a field this engine does not
    /// understand.
    pub fn decode(field: &str, value: &str) -> Result<Self, SyncError> {
        match field {
            "title" => Ok(Self::Title(value.to_owned())),
            "type" => Ok(Self::SportType(value.to_owned())),
            _ => Err(SyncError::UnknownUpdateField {
                field: field.to_owned(),
            }),
        }
    }
}

/// A validated athlete field change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AthleteUpdate {
    /// Authorization revoked or (re)granted.
    Authorized(bool),
}

impl AthleteUpdate {
    /// Decode one map entry; unknown fields and malformed values are
    /// rejected explicitly.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownUpdateField`] for an unknown field or an
    /// unparsable value.
    pub fn decode(field: &str, value: &str) -> Result<Self, SyncError> {
        match field {
            "authorized" => value.parse::<bool>().map(Self::Authorized).map_err(|_| {
                SyncError::UnknownUpdateField {
                    field: format!("authorized={value}"),
                }
            }),
            _ => Err(SyncError::UnknownUpdateField {
                field: field.to_owned(),
            }),
        }
    }
}

/// Handler for [`KIND`].
pub struct UpdateHookHandler {
    mgr: Arc<ManagerInner>,
}

impl UpdateHookHandler {
    pub(crate) fn new(mgr: Arc<ManagerInner>) -> Self {
        Self { mgr }
    }

    async fn update_activity(&self, event: &WebhookEvent) -> AppResult<JobOutcome> {
        let mgr = &self.mgr;

        if mgr.store.get_activity_summary(event.object_id).await?.is_none() {
            warn!(activity_id = event.object_id, "activity not found, update job abandoned");
            return Ok(JobOutcome::CompleteWith("activity not found, nothing to update".into()));
        }

        // Validate the whole map before writing anything.
        let updates = event
            .updates
            .iter()
            .map(|(field, value)| ActivityUpdate::decode(field, value))
            .collect::<Result<Vec<_>, _>>()?;

        for update in updates {
            match update {
                ActivityUpdate::Title(name) => {
                    mgr.store.update_activity_name(event.object_id, &name).await?;
                }
                ActivityUpdate::SportType(sport) => {
                    mgr.store.update_activity_sport(event.object_id, &sport).await?;
                }
            }
        }
        Ok(JobOutcome::Complete)
    }

    async fn delete_activity(&self, event: &WebhookEvent) -> AppResult<JobOutcome> {
        if self.mgr.store.delete_activity(event.object_id).await? {
            Ok(JobOutcome::Complete)
        } else {
            Ok(JobOutcome::CompleteWith("activity not found, nothing to delete".into()))
        }
    }

    async fn update_athlete(&self, event: &WebhookEvent) -> AppResult<JobOutcome> {
        let mgr = &self.mgr;

        if event.object_type != ObjectType::Athlete {
            return Ok(JobOutcome::CompleteWith("not an athlete update, skipping".into()));
        }

        let updates = event
            .updates
            .iter()
            .map(|(field, value)| {
                AthleteUpdate::decode(field, value).map_err(|decode_error| {
                    error!(
                        athlete_id = event.object_id,
                        field = field.as_str(),
                        value = value.as_str(),
                        "unknown athlete update"
                    );
                    decode_error
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for update in updates {
            match update {
                AthleteUpdate::Authorized(false) => {
                    let _ = mgr.store.delete_athlete_login(event.object_id).await?;
                }
                AthleteUpdate::Authorized(true) => {}
            }
        }
        Ok(JobOutcome::Complete)
    }
}

#[async_trait::async_trait]
impl JobHandler for UpdateHookHandler {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn work(&self, job: &Job) -> AppResult<JobOutcome> {
        let Ok(args) = serde_json::from_value::<UpdateHookArgs>(job.args.clone()) else {
            error!(job_id = job.id, "undecodable hook payload, job abandoned");
            return Ok(JobOutcome::CompleteWith("invalid payload, job abandoned".into()));
        };

        match args.op {
            HookOp::UpdateActivity => self.update_activity(&args.event).await,
            HookOp::DeleteActivity => self.delete_activity(&args.event).await,
            HookOp::UpdateAthlete => self.update_athlete(&args.event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{context, leased_job};
    use super::super::{JobHandler, JobOutcome};
    use super::{HookOp, UpdateHookArgs, UpdateHookHandler, KIND};
    use crate::models::{AspectType, ObjectType, WebhookEvent};
    use crate::store::Store;
    use crate::test_utils::{login, ride};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn event(
        object_type: ObjectType,
        object_id: i64,
        updates: &[(&str, &str)],
    ) -> WebhookEvent {
        WebhookEvent {
            object_type,
            aspect_type: AspectType::Update,
            object_id,
            owner_id: 7,
            updates: updates
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect::<HashMap<_, _>>(),
            event_time: Utc::now().timestamp(),
        }
    }

    fn hook_job(op: HookOp, event: WebhookEvent) -> crate::queue::Job {
        leased_job(
            KIND,
            serde_json::to_value(UpdateHookArgs { op, event }).unwrap(),
        )
    }

    async fn seed_activity(ctx: &super::super::testing::TestContext, activity_id: i64) {
        use crate::models::SyncPageBundle;
        let (map, summary) = ride(activity_id, 7, Utc::now()).into_rows();
        ctx.store
            .persist_sync_page(SyncPageBundle {
                rows: vec![(map, summary)],
                cursor: crate::models::SyncCursor::seed(7, Utc::now()),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn title_update_applies() {
        let ctx = context();
        seed_activity(&ctx, 11).await;

        let handler = UpdateHookHandler::new(Arc::clone(&ctx.inner));
        let outcome = handler
            .work(&hook_job(
                HookOp::UpdateActivity,
                event(ObjectType::Activity, 11, &[("title", "Renamed")]),
            ))
            .await
            .unwrap();

        assert!(matches!(outcome, JobOutcome::Complete));
        assert_eq!(ctx.store.summary(11).unwrap().name, "Renamed");
    }

    #[tokio::test]
    async fn unknown_field_fails_and_writes_nothing() {
        let ctx = context();
        seed_activity(&ctx, 11).await;

        let handler = UpdateHookHandler::new(Arc::clone(&ctx.inner));
        let result = handler
            .work(&hook_job(
                HookOp::UpdateActivity,
                event(
                    ObjectType::Activity,
                    11,
                    &[("title", "Renamed"), ("gear_id", "b123")],
                ),
            ))
            .await;

        assert!(result.is_err(), "unknown update fields surface for review");
        assert_eq!(
            ctx.store.summary(11).unwrap().name,
            "Ride 11",
            "validation happens before any write"
        );
    }

    #[tokio::test]
    async fn missing_activity_is_a_noop_success() {
        let ctx = context();
        let handler = UpdateHookHandler::new(Arc::clone(&ctx.inner));
        let outcome = handler
            .work(&hook_job(
                HookOp::UpdateActivity,
                event(ObjectType::Activity, 99, &[("title", "x")]),
            ))
            .await
            .unwrap();
        assert!(matches!(outcome, JobOutcome::CompleteWith(_)));
    }

    #[tokio::test]
    async fn deauthorization_deletes_credential() {
        let ctx = context();
        ctx.store.add_login(login(7));

        let handler = UpdateHookHandler::new(Arc::clone(&ctx.inner));
        let outcome = handler
            .work(&hook_job(
                HookOp::UpdateAthlete,
                event(ObjectType::Athlete, 7, &[("authorized", "false")]),
            ))
            .await
            .unwrap();

        assert!(matches!(outcome, JobOutcome::Complete));
        assert!(ctx.store.get_athlete_login(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_athlete_field_fails() {
        let ctx = context();
        ctx.store.add_login(login(7));

        let handler = UpdateHookHandler::new(Arc::clone(&ctx.inner));
        let result = handler
            .work(&hook_job(
                HookOp::UpdateAthlete,
                event(ObjectType::Athlete, 7, &[("weight", "82")]),
            ))
            .await;

        assert!(result.is_err());
        assert!(ctx.store.get_athlete_login(7).await.unwrap().is_some());
    }
}

#[cfg(test)]
mod decode_tests {
    use super::{ActivityUpdate, AthleteUpdate};
    use crate::errors::SyncError;

    #[test]
    fn activity_updates_decode() {
        assert_eq!(
            ActivityUpdate::decode("title", "Morning Ride").unwrap(),
            ActivityUpdate::Title("Morning Ride".into())
        );
        assert_eq!(
            ActivityUpdate::decode("type", "Ride").unwrap(),
            ActivityUpdate::SportType("Ride".into())
        );
        assert!(matches!(
            ActivityUpdate::decode("private", "true"),
            Err(SyncError::UnknownUpdateField { .. })
        ));
    }

    #[test]
    fn athlete_updates_decode() {
        assert_eq!(
            AthleteUpdate::decode("authorized", "false").unwrap(),
            AthleteUpdate::Authorized(false)
        );
        assert!(matches!(
            AthleteUpdate::decode("authorized", "nope"),
            Err(SyncError::UnknownUpdateField { .. })
        ));
        assert!(matches!(
            AthleteUpdate::decode("weight", "82"),
            Err(SyncError::UnknownUpdateField { .. })
        ));
    }
}
