//! Task records and their notification state.
//!
//! Tasks are owned by the sync layer. The engine reads them and writes back
//! only `notification_state`, `score`, `escalation_level` and
//! `last_notified_at`.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of dedupe keys retained per task.
pub const DEDUPE_LEDGER_CAP: usize = 50;

/// Status value the sync layer uses for finished work.
pub const DONE_STATUS: &str = "done";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Source-qualified id, e.g. `clickup:869bxxud4` or `github:17`
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_revenue: bool,
    /// People currently waiting on this task
    #[serde(default)]
    pub is_blocking: BTreeSet<String>,
    /// Upstream task ids this task waits on
    #[serde(default)]
    pub blocked_by: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workstream_id: Option<String>,
    /// Cached score; always recomputable, never the source of truth
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub escalation_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snooze_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notification_state: NotificationState,
}

impl Task {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            url: String::new(),
            status: status.into(),
            assignee: None,
            due_date: None,
            is_revenue: false,
            is_blocking: BTreeSet::new(),
            blocked_by: BTreeSet::new(),
            last_activity: None,
            entity_id: None,
            workstream_id: None,
            score: 0,
            escalation_level: 0,
            last_notified_at: None,
            snooze_until: None,
            notification_state: NotificationState::default(),
        }
    }

    /// Source prefix of the id (`clickup`, `github`, ...)
    pub fn source(&self) -> &str {
        self.id.split_once(':').map(|(source, _)| source).unwrap_or("")
    }

    pub fn is_open(&self) -> bool {
        !self.status.trim().eq_ignore_ascii_case(DONE_STATUS)
    }

    pub fn is_assigned_to(&self, user: &str) -> bool {
        self.assignee.as_deref() == Some(user)
    }

    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snooze_until.map(|until| until > now).unwrap_or(false)
    }
}

/// Which deadline warning was last sent for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadlineMark {
    #[serde(rename = "24h")]
    DayBefore,
    #[serde(rename = "2h")]
    DueToday,
}

impl DeadlineMark {
    pub fn fingerprint(self) -> &'static str {
        match self {
            DeadlineMark::DayBefore => "24h",
            DeadlineMark::DueToday => "2h",
        }
    }

    pub fn from_fingerprint(raw: &str) -> Option<Self> {
        match raw {
            "24h" => Some(DeadlineMark::DayBefore),
            "2h" => Some(DeadlineMark::DueToday),
            _ => None,
        }
    }
}

/// Per-task diff snapshot plus the dedupe ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_assignee: Option<String>,
    #[serde(default)]
    pub prev_blocked_by: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deadline_notified: Option<DeadlineMark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_overdue_notified: Option<NaiveDate>,
    #[serde(default)]
    pub dedupe_keys: DedupeLedger,
}

/// Bounded, insertion-ordered set of accepted dedupe keys.
///
/// Holds at most [`DEDUPE_LEDGER_CAP`] keys; the oldest is evicted first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct DedupeLedger {
    keys: VecDeque<String>,
}

impl DedupeLedger {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|existing| existing == key)
    }

    /// Record a key. Re-recording a key already present is a no-op.
    pub fn record(&mut self, key: impl Into<String>) {
        let key = key.into();
        if self.contains(&key) {
            return;
        }
        self.keys.push_back(key);
        while self.keys.len() > DEDUPE_LEDGER_CAP {
            self.keys.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for DedupeLedger {
    fn from(keys: Vec<String>) -> Self {
        let mut ledger = DedupeLedger::default();
        for key in keys {
            ledger.record(key);
        }
        ledger
    }
}

impl From<DedupeLedger> for Vec<String> {
    fn from(ledger: DedupeLedger) -> Self {
        ledger.keys.into_iter().collect()
    }
}
