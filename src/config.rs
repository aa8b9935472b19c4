// ABOUTME: Environment-based engine configuration with safe defaults
// ABOUTME: Queue concurrency, pagination, event window, and strategy selection
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Engine Configuration
//!
//! Environment-only configuration, matching how the rest of the deployment
//! is wired. Every knob has a production default; `from_env` only overrides
//! what is explicitly set.

use crate::classify::EventWindow;
use crate::errors::AppResult;
use anyhow::Context;
use chrono::NaiveDate;
use std::env;
use std::time::Duration;

/// Which pagination strategy drives athlete sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStrategyKind {
    /// Canonical: newest cursor advances forward in time.
    #[default]
    Forward,
    /// Legacy: walks oldest-unseen activities, retained as a fallback.
    Back,
}

/// Per-queue worker counts. Kept low by default: the external quota is the
/// real constraint, not CPU.
#[derive(Debug, Clone, Copy)]
pub struct QueueWorkers {
    /// Detail fetches against the upstream API.
    pub strava: usize,
    /// Athlete pagination loads.
    pub backload: usize,
    /// Pause/resume control jobs.
    pub control: usize,
    /// Database-only jobs (updates, views, GC).
    pub database: usize,
}

impl Default for QueueWorkers {
    fn default() -> Self {
        Self {
            strava: 1,
            backload: 1,
            control: 1,
            database: 1,
        }
    }
}

/// Everything the scheduler engine needs to run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upstream API base URL, no trailing slash.
    pub base_url: String,
    /// Activities per listing page.
    pub page_size: usize,
    /// Worker counts per named queue.
    pub workers: QueueWorkers,
    /// Pagination strategy for athlete sync.
    pub sync_strategy: SyncStrategyKind,
    /// The yearly event window used by the seasonal gate.
    pub event_window: EventWindow,
    /// Athlete whose credential loads competitive segments.
    pub segment_admin_athlete: i64,
    /// Delay before a listed ride's detail fetch (segment population lag).
    pub detail_fetch_delay: Duration,
    /// Delay before a webhook-created activity's detail fetch.
    pub webhook_fetch_delay: Duration,
    /// Idle sleep between lease polls.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.strava.com/api/v3".into(),
            page_size: 50,
            workers: QueueWorkers::default(),
            sync_strategy: SyncStrategyKind::Forward,
            event_window: EventWindow {
                // Anchored each year by ops; membership uses local start dates.
                start: NaiveDate::from_ymd_opt(2024, 11, 8).unwrap_or_default(),
                days: 4,
            },
            segment_admin_athlete: 0,
            detail_fetch_delay: Duration::from_secs(5 * 60),
            webhook_fetch_delay: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment on top of defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when a set variable fails to parse.
    pub fn from_env() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(raw) = env::var("SYNC_API_BASE_URL") {
            config.base_url = raw.trim_end_matches('/').to_owned();
        }
        if let Some(value) = parse_var("SYNC_PAGE_SIZE")? {
            config.page_size = value;
        }
        if let Some(value) = parse_var("SYNC_STRAVA_WORKERS")? {
            config.workers.strava = value;
        }
        if let Some(value) = parse_var("SYNC_BACKLOAD_WORKERS")? {
            config.workers.backload = value;
        }
        if let Ok(raw) = env::var("SYNC_STRATEGY") {
            config.sync_strategy = match raw.to_lowercase().as_str() {
                "back" | "backload" => SyncStrategyKind::Back,
                _ => SyncStrategyKind::Forward,
            };
        }
        if let Ok(raw) = env::var("SYNC_EVENT_START") {
            config.event_window.start = raw
                .parse::<NaiveDate>()
                .with_context(|| format!("parse SYNC_EVENT_START {raw:?}"))?;
        }
        if let Some(value) = parse_var("SYNC_EVENT_DAYS")? {
            config.event_window.days = value;
        }
        if let Some(value) = parse_var("SYNC_SEGMENT_ADMIN_ATHLETE")? {
            config.segment_admin_athlete = value;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> AppResult<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => {
            let value = raw.parse::<T>().with_context(|| format!("parse {key} {raw:?}"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineConfig, SyncStrategyKind};

    #[test]
    fn defaults_are_quota_conservative() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.workers.strava, 1);
        assert_eq!(config.sync_strategy, SyncStrategyKind::Forward);
        assert_eq!(config.detail_fetch_delay.as_secs(), 300);
        assert_eq!(config.webhook_fetch_delay.as_secs(), 1800);
    }
}
