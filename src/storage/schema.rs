//! Persisted row shapes that are not plain model types
//!
//! Most tables map one-to-one onto [`crate::model`] types. The "latest status"
//! table is the exception: besides the [`StatusRecord`] it keeps the script
//! counters and the last threshold classification, so a restarted engine
//! resumes with the same `executions_used` budget instead of a fresh one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Classification, DirectionCounters, StatusRecord, TargetId};

/// Latest status row of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub target_id: TargetId,
    pub record: StatusRecord,
    pub counters: DirectionCounters,
    pub classification: Classification,
}

/// Filter for the append-only history tables
///
/// Rows come back oldest first. With a `limit` only the most recent `limit`
/// rows inside the range are returned.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub target_id: Option<TargetId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn for_target(target_id: TargetId) -> Self {
        Self {
            target_id: Some(target_id),
            ..Self::default()
        }
    }

    pub fn latest(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub(crate) fn matches(&self, target_id: TargetId, at: DateTime<Utc>) -> bool {
        self.target_id.is_none_or(|id| id == target_id)
            && self.since.is_none_or(|since| at >= since)
            && self.until.is_none_or(|until| at <= until)
    }
}

/// Rows removed by a history purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub executions: u64,
    pub metrics: u64,
}
