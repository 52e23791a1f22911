//! Visit tracking for QR codes.
//!
//! A QR code keeps cumulative `views`/`scans` counters plus a bounded log of
//! recent visits. The log drives deduplication: a visitor seen within the
//! last [`DEDUP_WINDOW_HOURS`] only adds a view, not a scan.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEDUP_WINDOW_HOURS: i64 = 24;
pub const VISIT_LOG_CAPACITY: usize = 100;
pub const UNKNOWN_USER_AGENT: &str = "Unknown";

/// Who is visiting. Only `ip` takes part in deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visitor {
    pub ip: String,
    pub user_agent: String,
}

impl Visitor {
    pub fn new(ip: impl Into<String>, user_agent: Option<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.unwrap_or_else(|| UNKNOWN_USER_AGENT.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub visitor_ip: String,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}

/// Recent visits ordered by timestamp, oldest first, never longer than
/// [`VISIT_LOG_CAPACITY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<VisitRecord>", into = "Vec<VisitRecord>")]
pub struct VisitLog {
    records: VecDeque<VisitRecord>,
}

impl VisitLog {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &VisitRecord> {
        self.records.iter()
    }

    /// Whether `visitor_ip` was recorded strictly after `now - 24h`.
    pub fn is_duplicate(&self, visitor_ip: &str, now: DateTime<Utc>) -> bool {
        let window_start = now - Duration::hours(DEDUP_WINDOW_HOURS);
        self.records
            .iter()
            .any(|record| record.visitor_ip == visitor_ip && record.timestamp > window_start)
    }

    /// Inserts in timestamp order and evicts the oldest record when full.
    pub fn push(&mut self, record: VisitRecord) {
        // Records normally arrive in order, so the insertion point is the end.
        let position = self
            .records
            .partition_point(|existing| existing.timestamp <= record.timestamp);
        self.records.insert(position, record);
        if self.records.len() > VISIT_LOG_CAPACITY {
            self.records.pop_front();
        }
    }
}

impl From<Vec<VisitRecord>> for VisitLog {
    fn from(mut records: Vec<VisitRecord>) -> Self {
        records.sort_by_key(|record| record.timestamp);
        let excess = records.len().saturating_sub(VISIT_LOG_CAPACITY);
        Self {
            records: records.into_iter().skip(excess).collect(),
        }
    }
}

impl From<VisitLog> for Vec<VisitRecord> {
    fn from(log: VisitLog) -> Self {
        log.records.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitOutcome {
    /// First visit from this visitor inside the dedup window.
    Scan,
    /// Repeat visit; only `views` moved.
    View,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrStatistics {
    pub views: i64,
    pub scans: i64,
    pub last_visited_at: Option<DateTime<Utc>>,
    pub recent_visits: VisitLog,
}

impl QrStatistics {
    /// Applies one visit at `now`. Never fails; `scans <= views` holds
    /// afterwards whenever it held before.
    pub fn record_visit(&mut self, visitor: &Visitor, now: DateTime<Utc>) -> VisitOutcome {
        let outcome = if self.recent_visits.is_duplicate(&visitor.ip, now) {
            VisitOutcome::View
        } else {
            self.scans += 1;
            self.recent_visits.push(VisitRecord {
                visitor_ip: visitor.ip.clone(),
                user_agent: visitor.user_agent.clone(),
                timestamp: now,
            });
            VisitOutcome::Scan
        };
        self.views += 1;
        // Visits can commit out of order; keep the latest timestamp.
        self.last_visited_at = Some(self.last_visited_at.map_or(now, |last| last.max(now)));
        outcome
    }
}
