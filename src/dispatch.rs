//! Escalation dispatch planning.
//!
//! Picks the overdue tasks that warrant their own message, groups them by
//! level and decides individual versus consolidated delivery. The engine
//! runs the survivors of the notification filter through [`plan`] and
//! delivers the result.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::escalation::{self, EscalationLevel};
use crate::events::{Event, MessageBody, MessageRequest, TaskRef, Trigger};
use crate::task::Task;

/// Tasks sharing a level at or above this count are sent as one message.
pub const CONSOLIDATE_AT: usize = 3;

/// Tasks listed in a consolidated message; the rest are counted.
pub const DISPLAY_CAP: usize = 10;

pub const BULK_DEFER_SUGGESTION: &str = "Want me to bulk-defer these to next week?";

/// Escalation level for `task` if it should be escalated now.
///
/// Only open tasks owned by `user` with a due date qualify; snoozed tasks
/// and tasks below the individual-notification level are skipped.
pub fn eligible(task: &Task, user: &str, today: NaiveDate, now: DateTime<Utc>) -> Option<EscalationLevel> {
    if !task.is_open() || !task.is_assigned_to(user) || task.due_date.is_none() || task.is_snoozed(now) {
        return None;
    }
    let level = escalation::level(task, today);
    level.notifies_individually().then_some(level)
}

/// The overdue event an escalation notice stands for. One per level, so each
/// rung of the ladder notifies once.
pub fn escalation_event(task: &Task, level: EscalationLevel) -> Event {
    Event::new(Trigger::Overdue, &task.id, format!("level={}", level.value()))
        .with("level", level.value())
}

/// A task that passed the filter at its current level.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub task: Task,
    pub level: EscalationLevel,
    pub score: i64,
    pub event: Event,
}

impl Candidate {
    pub fn new(task: Task, level: EscalationLevel, score: i64, today: NaiveDate) -> Self {
        let event = escalation_event(&task, level)
            .with("days_overdue", escalation::days_overdue(task.due_date, today));
        Self {
            task,
            level,
            score,
            event,
        }
    }
}

/// One outbound escalation notice.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Individual(Candidate),
    Grouped {
        level: EscalationLevel,
        members: Vec<Candidate>,
    },
}

impl Dispatch {
    pub fn level(&self) -> EscalationLevel {
        match self {
            Dispatch::Individual(candidate) => candidate.level,
            Dispatch::Grouped { level, .. } => *level,
        }
    }

    /// Every task covered, including those past the display cap.
    pub fn members(&self) -> &[Candidate] {
        match self {
            Dispatch::Individual(candidate) => std::slice::from_ref(candidate),
            Dispatch::Grouped { members, .. } => members,
        }
    }

    pub fn request(&self, created_at: DateTime<Utc>) -> MessageRequest {
        let body = match self {
            Dispatch::Individual(candidate) => MessageBody::Escalation {
                task: TaskRef::of(&candidate.task, candidate.score),
                level: candidate.level,
                prose: candidate.level.message(),
                dedupe_key: candidate.event.dedupe_key(),
            },
            Dispatch::Grouped { level, members } => {
                let tasks: Vec<TaskRef> = members
                    .iter()
                    .take(DISPLAY_CAP)
                    .map(|candidate| TaskRef::of(&candidate.task, candidate.score))
                    .collect();
                MessageBody::GroupedEscalation {
                    level: *level,
                    prose: level.message(),
                    total: members.len(),
                    more: members.len().saturating_sub(tasks.len()),
                    tasks,
                    suggestion: BULK_DEFER_SUGGESTION.to_string(),
                }
            }
        };
        MessageRequest::new(body, created_at)
    }
}

pub fn group_by_level(candidates: Vec<Candidate>) -> BTreeMap<EscalationLevel, Vec<Candidate>> {
    let mut groups: BTreeMap<EscalationLevel, Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        groups.entry(candidate.level).or_default().push(candidate);
    }
    groups
}

/// Group by level, most urgent first; within a group, highest score first.
pub fn plan(candidates: Vec<Candidate>) -> Vec<Dispatch> {
    let mut dispatches = Vec::new();
    for (level, mut members) in group_by_level(candidates).into_iter().rev() {
        members.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.task.id.cmp(&b.task.id)));
        if members.len() >= CONSOLIDATE_AT {
            dispatches.push(Dispatch::Grouped { level, members });
        } else {
            dispatches.extend(members.into_iter().map(Dispatch::Individual));
        }
    }
    dispatches
}
