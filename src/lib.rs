// ABOUTME: Library entry point for the hugel sync engine
// ABOUTME: Rate-governed job scheduling and incremental athlete activity sync
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

#![deny(unsafe_code)]

//! # Hugel Sync
//!
//! A rate-governed, idempotent job-scheduling and incremental-synchronization
//! engine. It pulls per-athlete activity history from a third-party fitness
//! platform under a strict shared API quota while guaranteeing
//! at-most-one-pending-instance job semantics, priority ordering,
//! transactional persistence, and graceful backoff.
//!
//! ## Architecture
//!
//! - [`admission`]: sliding-window gate over the shared external quota
//! - [`queue`]: leasable job queue with uniqueness, priorities, and snooze
//! - [`scheduler`]: the engine with its worker loops, job kinds, webhook
//!   routing, pause/resume control plane, and the [`scheduler::Manager`]
//!   facade
//! - [`store`] / [`upstream`]: the two external collaborators, as traits
//!
//! HTTP route wiring, OAuth token exchange, schema migrations, and CLI entry
//! points live outside this crate; it exposes the `Manager` operations and
//! consumes the collaborator traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hugel_sync::admission::RateAdmission;
//! use hugel_sync::config::EngineConfig;
//! use hugel_sync::queue::MemoryQueue;
//! use hugel_sync::scheduler::{Manager, Options};
//! use hugel_sync::test_utils::{MemoryStore, ScriptedApi};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let admission = Arc::new(RateAdmission::new());
//! let manager = Manager::new(Options {
//!     api: Arc::new(ScriptedApi::new()),
//!     store: Arc::new(MemoryStore::new()),
//!     queue: Arc::new(MemoryQueue::new()),
//!     admission,
//!     config,
//! });
//! manager.start();
//! manager.enqueue_forward_load(2_661_162).await?;
//! # Ok(())
//! # }
//! ```

/// Admission control for the shared upstream API quota
pub mod admission;

/// Ride classification heuristics for the event leaderboard
pub mod classify;

/// Environment-based engine configuration
pub mod config;

/// Time-gated action deduplication for noisy logs
pub mod debounce;

/// Eddington-style cumulative threshold accumulator
pub mod eddington;

/// Unified error taxonomy
pub mod errors;

/// Structured logging setup
pub mod logging;

/// Domain models and unit conversions
pub mod models;

/// Leasable job queue abstraction and in-memory implementation
pub mod queue;

/// Scheduler engine, job kinds, and the manager facade
pub mod scheduler;

/// Transactional domain persistence trait
pub mod store;

/// In-memory collaborator implementations for tests
pub mod test_utils;

/// Upstream fitness-platform API client and trait seam
pub mod upstream;
