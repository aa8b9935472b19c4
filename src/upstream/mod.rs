// ABOUTME: Upstream fitness-platform API surface consumed by the sync engine
// ABOUTME: Trait seam, wire models, and error classification for bearer-token calls
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Upstream API
//!
//! The platform exposes three read endpoints this engine cares about: the
//! paginated activity listing, the activity detail (with segment efforts),
//! and the segment detail. All of them return the shared-quota usage in
//! response headers, which the client feeds into [`crate::admission`].
//!
//! Workers depend on the [`FitnessApi`] trait so tests can script responses
//! without a network.

/// Bearer-token HTTP client implementation.
pub mod client;

/// Wire models and conversions into domain rows.
pub mod models;

pub use client::PlatformClient;
pub use models::{ActivityData, DetailedActivityData, SegmentData, SegmentEffortData};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Parameters for one page of the activity listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListParams {
    /// Page size; the engine uses 50.
    pub per_page: usize,
    /// Only activities starting strictly after this instant.
    pub after: Option<DateTime<Utc>>,
    /// Only activities starting before this instant.
    pub before: Option<DateTime<Utc>>,
}

/// Failure talking to the upstream platform.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response with its body captured for classification.
    #[error("upstream returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text (truncated by the client).
        body: String,
    },

    /// Transport-level failure.
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    /// 404: the resource is gone; terminal.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// 429: the shared quota is exhausted upstream.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }

    /// 401/403: the athlete revoked access.
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }

    /// Platform-wide outage: the bespoke 597 maintenance code, or a 502
    /// carrying the known "temporarily unavailable" page.
    #[must_use]
    pub fn is_maintenance(&self) -> bool {
        match self {
            Self::Status { status: 597, .. } => true,
            Self::Status { status: 502, body } => body.contains("temporarily unavailable"),
            _ => false,
        }
    }
}

/// Read-side of the upstream platform API.
#[async_trait]
pub trait FitnessApi: Send + Sync {
    /// One page of activity summaries for the token's athlete, newest
    /// filtering per `params`.
    async fn list_activities(
        &self,
        access_token: &str,
        params: ListParams,
    ) -> Result<Vec<ActivityData>, ApiError>;

    /// Full activity detail including segment efforts.
    async fn get_activity(
        &self,
        access_token: &str,
        activity_id: i64,
        include_efforts: bool,
    ) -> Result<DetailedActivityData, ApiError>;

    /// Segment detail.
    async fn get_segment(&self, access_token: &str, segment_id: i64)
        -> Result<SegmentData, ApiError>;
}
