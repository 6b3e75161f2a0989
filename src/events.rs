//! Notification events and the message requests handed to the send boundary.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::escalation::EscalationLevel;
use crate::task::Task;

pub const MESSAGE_SCHEMA_VERSION: &str = "nudge.message.v1";

/// The closed set of things that can interrupt the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    DeadlineWarning,
    Overdue,
    Assigned,
    StatusCritical,
    Mentioned,
    CommentOnOwned,
    BlockerResolved,
}

impl Trigger {
    pub const ALL: [Trigger; 7] = [
        Trigger::DeadlineWarning,
        Trigger::Overdue,
        Trigger::Assigned,
        Trigger::StatusCritical,
        Trigger::Mentioned,
        Trigger::CommentOnOwned,
        Trigger::BlockerResolved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::DeadlineWarning => "deadline_warning",
            Trigger::Overdue => "overdue",
            Trigger::Assigned => "assigned",
            Trigger::StatusCritical => "status_critical",
            Trigger::Mentioned => "mentioned",
            Trigger::CommentOnOwned => "comment_on_owned",
            Trigger::BlockerResolved => "blocker_resolved",
        }
    }

    /// Time-sensitive triggers skip the score threshold.
    pub fn is_threshold_exempt(self) -> bool {
        matches!(self, Trigger::DeadlineWarning | Trigger::Overdue)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        Trigger::ALL
            .into_iter()
            .find(|trigger| trigger.as_str() == raw.trim())
            .ok_or_else(|| format!("unknown trigger '{raw}'"))
    }
}

/// A detected, fingerprinted candidate for notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub trigger: Trigger,
    pub task_id: String,
    pub fingerprint: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Event {
    pub fn new(trigger: Trigger, task_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            trigger,
            task_id: task_id.into(),
            fingerprint: fingerprint.into(),
            context: Map::new(),
        }
    }

    /// Attach a context entry for message rendering.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// `trigger:task_id:fingerprint`, the unit of at-most-once notification.
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}:{}", self.trigger, self.task_id, self.fingerprint)
    }
}

/// What the presentation layer needs to render a line about one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub score: i64,
}

impl TaskRef {
    pub fn of(task: &Task, score: i64) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            url: task.url.clone(),
            due_date: task.due_date,
            score,
        }
    }
}

/// Body of an outbound message request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    /// One accepted event
    Event {
        task: TaskRef,
        trigger: Trigger,
        fingerprint: String,
        dedupe_key: String,
        #[serde(default)]
        context: Map<String, Value>,
    },
    /// One overdue task at an escalation level
    Escalation {
        task: TaskRef,
        level: EscalationLevel,
        prose: String,
        dedupe_key: String,
    },
    /// Several tasks sharing an escalation level
    GroupedEscalation {
        level: EscalationLevel,
        prose: String,
        total: usize,
        tasks: Vec<TaskRef>,
        more: usize,
        suggestion: String,
    },
}

impl MessageBody {
    /// Task ids this message is about.
    pub fn task_ids(&self) -> Vec<&str> {
        match self {
            MessageBody::Event { task, .. } | MessageBody::Escalation { task, .. } => {
                vec![task.id.as_str()]
            }
            MessageBody::GroupedEscalation { tasks, .. } => {
                tasks.iter().map(|task| task.id.as_str()).collect()
            }
        }
    }
}

/// A structured request for the send boundary to render and deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub schema_version: String,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl MessageRequest {
    pub fn new(body: MessageBody, created_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: MESSAGE_SCHEMA_VERSION.to_string(),
            request_id: Ulid::new().to_string(),
            created_at,
            body,
        }
    }

    pub fn for_event(event: &Event, task: &Task, score: i64, created_at: DateTime<Utc>) -> Self {
        Self::new(
            MessageBody::Event {
                task: TaskRef::of(task, score),
                trigger: event.trigger,
                fingerprint: event.fingerprint.clone(),
                dedupe_key: event.dedupe_key(),
                context: event.context.clone(),
            },
            created_at,
        )
    }
}
