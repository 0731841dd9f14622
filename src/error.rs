//! Error taxonomy for the staging queue and approval pipeline.
//!
//! Line-scoped parse/validation failures are not represented here; they are
//! collected as [`crate::model::LineError`] values next to the lines that
//! did parse. This module covers the record-level outcomes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Same fingerprint seen inside the dedup window. Informational for the
    /// caller, not a failure.
    #[error("duplicate message within dedup window")]
    Duplicate,

    #[error("record {0} not found")]
    NotFound(i64),

    /// Lost the race on a terminal transition; no state was changed.
    #[error("record {0} already decided")]
    AlreadyDecided(i64),

    /// Approval requires at least one successfully interpreted stake.
    #[error("record {0} has no valid entries to approve")]
    EmptyEntries(i64),

    /// The permanent-store write failed; the record keeps its pre-decide
    /// status and can be retried.
    #[error("ledger commit failed: {0}")]
    Commit(#[source] anyhow::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}
