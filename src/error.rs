//! # Error types used by the pool core.
//!
//! This module defines two main error enums:
//!
//! - [`SpawnError`] errors raised by the external spawner while producing
//!   a worker process.
//! - [`GetError`] errors delivered to parked `get` waiters when their
//!   request can no longer be satisfied.
//!
//! Both types provide `as_label` for logs/metrics. [`SpawnError`] has an
//! additional `is_retryable()` used by the spawn driver's retry loop.

use thiserror::Error;

/// # Errors produced by the spawner.
///
/// The spawn driver classifies these to decide between bounded retry and
/// failing the whole spawn loop.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum SpawnError {
    /// Non-recoverable spawn failure: misconfiguration, application boot
    /// crash surfaced as a well-formed error. Never retried.
    #[error("spawn failed (no retry): {reason}")]
    Fatal { reason: String },

    /// Spawn failed but may succeed if retried (resource pressure,
    /// momentary I/O trouble).
    #[error("spawn failed: {reason}")]
    Transient { reason: String },

    /// The spawn loop was cancelled during a suspension point.
    ///
    /// This is **not an error** in the traditional sense, it signals
    /// intentional teardown and must not be logged at error level.
    #[error("spawn cancelled")]
    Cancelled,
}

impl SpawnError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::Fatal { .. } => "spawn_fatal",
            SpawnError::Transient { .. } => "spawn_transient",
            SpawnError::Cancelled => "spawn_cancelled",
        }
    }

    /// Indicates whether the spawn driver may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SpawnError::Transient { .. })
    }
}

/// # Errors delivered to parked `get` waiters.
///
/// A waiter callback is invoked with exactly one of these when the group
/// cannot produce a session for it.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum GetError {
    /// The spawner failed while the waiter was parked; backpressure is
    /// surfaced to the caller instead of retrying silently.
    #[error("could not spawn a worker process: {0}")]
    SpawnFailed(#[from] SpawnError),

    /// The process a session was being opened on disappeared mid-drain.
    #[error("worker process {pid} is gone")]
    ProcessVanished { pid: u32 },

    /// The group was shut down while the waiter was parked.
    #[error("group is shutting down")]
    Cancelled,
}

impl GetError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            GetError::SpawnFailed(_) => "get_spawn_failed",
            GetError::ProcessVanished { .. } => "get_process_vanished",
            GetError::Cancelled => "get_cancelled",
        }
    }
}
