//! Row and filter models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business
//! logic lives in the queue and coordinator layers.

use crate::model::{LineError, ParsedLine, RecordStatus};
use chrono::{DateTime, Utc};

/// Full staged-record row as stored. The parsed breakdown and line errors
/// are persisted as JSON snapshots for immediate display and are
/// recomputed from `body` on every edit.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub id: i64,
    pub fingerprint: String,
    pub sender_name: String,
    pub sender_phone: String,
    pub group_name: String,
    pub body: String,
    pub status: RecordStatus,
    pub customer: Option<String>,
    pub bazar: Option<String>,
    pub parsed_json: String,
    pub errors_json: String,
    pub total: i64,
    pub committed: bool,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl RecordRow {
    pub fn parsed_lines(&self) -> Vec<ParsedLine> {
        serde_json::from_str(&self.parsed_json).unwrap_or_default()
    }

    pub fn line_errors(&self) -> Vec<LineError> {
        serde_json::from_str(&self.errors_json).unwrap_or_default()
    }
}

/// Snapshot filter for listing staged records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<RecordStatus>,
    pub customer: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn with_status(status: RecordStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}
