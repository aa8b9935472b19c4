// ABOUTME: Bearer-token HTTP client for the upstream platform API
// ABOUTME: Shared connection pool, quota header ingestion, typed error mapping
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

use super::{ActivityData, ApiError, DetailedActivityData, FitnessApi, ListParams, SegmentData};
use crate::admission::RateAdmission;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Cap on captured error-body text.
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Interval/daily limit pair header.
const HEADER_READ_LIMIT: &str = "x-readratelimit-limit";

/// Interval/daily usage pair header.
const HEADER_READ_USAGE: &str = "x-readratelimit-usage";

/// Global shared HTTP client with connection pooling.
static SHARED_CLIENT: OnceLock<Client> = OnceLock::new();

fn shared_client() -> &'static Client {
    SHARED_CLIENT.get_or_init(|| {
        ClientBuilder::new()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Reqwest-backed [`FitnessApi`] implementation.
///
/// Every response, success or failure, has its quota headers fed into the
/// injected [`RateAdmission`] so the engine's view of the shared budget stays
/// current without a separate polling call.
pub struct PlatformClient {
    base_url: String,
    client: Client,
    admission: Arc<RateAdmission>,
}

impl PlatformClient {
    /// New client against `base_url` (no trailing slash).
    #[must_use]
    pub fn new(base_url: impl Into<String>, admission: Arc<RateAdmission>) -> Self {
        Self {
            base_url: base_url.into(),
            client: shared_client().clone(),
            admission,
        }
    }

    fn ingest_quota_headers(&self, response: &Response) {
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
        };
        self.admission
            .ingest_headers(header(HEADER_READ_LIMIT), header(HEADER_READ_USAGE));
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        access_token: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await?;

        self.ingest_quota_headers(&response);

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(MAX_ERROR_BODY_BYTES);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl FitnessApi for PlatformClient {
    async fn list_activities(
        &self,
        access_token: &str,
        params: ListParams,
    ) -> Result<Vec<ActivityData>, ApiError> {
        let mut query = vec![("per_page", params.per_page.to_string())];
        if let Some(after) = params.after {
            query.push(("after", after.timestamp().to_string()));
        }
        if let Some(before) = params.before {
            query.push(("before", before.timestamp().to_string()));
        }
        self.get_json(access_token, "/athlete/activities", &query)
            .await
    }

    async fn get_activity(
        &self,
        access_token: &str,
        activity_id: i64,
        include_efforts: bool,
    ) -> Result<DetailedActivityData, ApiError> {
        let query = vec![("include_all_efforts", include_efforts.to_string())];
        self.get_json(access_token, &format!("/activities/{activity_id}"), &query)
            .await
    }

    async fn get_segment(
        &self,
        access_token: &str,
        segment_id: i64,
    ) -> Result<SegmentData, ApiError> {
        self.get_json(access_token, &format!("/segments/{segment_id}"), &[])
            .await
    }
}
