// ABOUTME: Unified error taxonomy for sync jobs and upstream API failures
// ABOUTME: Classifies failures into retry, snooze, audit, and terminal outcomes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

//! # Sync Error Taxonomy
//!
//! Every job failure is classified into one of these variants before the
//! engine decides what to do with the job. The mapping is:
//!
//! - [`SyncError::AdmissionDenied`], [`SyncError::UpstreamRateLimited`],
//!   [`SyncError::UpstreamMaintenance`]: snooze, not a failure.
//! - [`SyncError::Unauthenticated`], [`SyncError::NotFound`]: terminal no-op.
//! - [`SyncError::Transient`], [`SyncError::Persistence`]: engine-managed
//!   retry with backoff up to max attempts.
//! - [`SyncError::Unrecoverable`]: written to the failed-job audit table and
//!   finalized as success so a poisoned payload can never cause a retry storm.
//! - [`SyncError::UnknownUpdateField`]: the job fails and stays visible for
//!   manual review.

use thiserror::Error;

/// Result alias used across the engine.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Classified failure of a sync job step.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The shared API quota has no room for the requested calls.
    #[error("admission denied for {calls} upstream call(s)")]
    AdmissionDenied {
        /// Number of calls that were requested.
        calls: i64,
    },

    /// The athlete's credential was revoked upstream.
    #[error("athlete {athlete_id} is no longer authenticated")]
    Unauthenticated {
        /// Athlete whose credential is gone.
        athlete_id: i64,
    },

    /// The upstream resource does not exist. Terminal, zero writes.
    #[error("upstream resource not found: {0}")]
    NotFound(String),

    /// Upstream reported a maintenance outage.
    #[error("upstream maintenance: {0}")]
    UpstreamMaintenance(String),

    /// Upstream returned 429.
    #[error("upstream rate limit hit")]
    UpstreamRateLimited,

    /// Something failed that is expected to succeed on a later attempt.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// A domain write failed; the surrounding transaction rolled back.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Upstream returned data we can never process. Audited, then dropped.
    #[error("unrecoverable upstream error: {0}")]
    Unrecoverable(String),

    /// A webhook update carried a field this engine does not understand.
    #[error("unknown update field: {field}")]
    UnknownUpdateField {
        /// The rejected field name.
        field: String,
    },
}

impl SyncError {
    /// True when the error should reschedule the job without consuming an
    /// attempt.
    #[must_use]
    pub const fn is_snooze(&self) -> bool {
        matches!(
            self,
            Self::AdmissionDenied { .. } | Self::UpstreamRateLimited | Self::UpstreamMaintenance(_)
        )
    }

    /// True when the error finalizes the job with nothing written.
    #[must_use]
    pub const fn is_terminal_noop(&self) -> bool {
        matches!(self, Self::Unauthenticated { .. } | Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::SyncError;

    #[test]
    fn snooze_classification() {
        assert!(SyncError::UpstreamRateLimited.is_snooze());
        assert!(SyncError::AdmissionDenied { calls: 1 }.is_snooze());
        assert!(SyncError::UpstreamMaintenance("code=597".into()).is_snooze());
        assert!(!SyncError::Transient("boom".into()).is_snooze());
    }

    #[test]
    fn terminal_classification() {
        assert!(SyncError::Unauthenticated { athlete_id: 7 }.is_terminal_noop());
        assert!(SyncError::NotFound("activity 9".into()).is_terminal_noop());
        assert!(!SyncError::Persistence("tx".into()).is_terminal_noop());
    }
}
