//! Notification state transitions: `commit` after a decision, `touch` when
//! nothing was accepted. Both move the diff snapshot forward.

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::events::{Event, Trigger};
use crate::task::{DeadlineMark, Task};

/// The live fields detection diffs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub status: String,
    pub assignee: Option<String>,
    pub blocked_by: BTreeSet<String>,
}

impl Snapshot {
    pub fn of(task: &Task) -> Self {
        Self {
            status: task.status.clone(),
            assignee: task.assignee.clone(),
            blocked_by: task.blocked_by.clone(),
        }
    }

    /// Make this the task's last-observed snapshot.
    pub fn apply_to(&self, task: &mut Task) {
        let state = &mut task.notification_state;
        state.prev_status = Some(self.status.clone());
        state.prev_assignee = self.assignee.clone();
        state.prev_blocked_by = self.blocked_by.clone();
    }
}

/// Record an accepted event and refresh the snapshot from the task's
/// current fields.
pub fn commit(task: &mut Task, event: &Event, today: NaiveDate) {
    let observed = Snapshot::of(task);
    commit_observed(task, event, today, &observed);
}

/// Like [`commit`], but refresh the snapshot to the fields seen when the
/// event was detected. Changes that landed while the message was in flight
/// stay visible to the next detection.
pub fn commit_observed(task: &mut Task, event: &Event, today: NaiveDate, observed: &Snapshot) {
    record(task, event, today);
    observed.apply_to(task);
}

/// Ledger and trigger marker only; the diff snapshot is left alone.
///
/// Used when other events detected from the same snapshot are still
/// undelivered, so their transitions stay detectable.
pub fn record(task: &mut Task, event: &Event, today: NaiveDate) {
    let state = &mut task.notification_state;
    state.dedupe_keys.record(event.dedupe_key());
    match event.trigger {
        Trigger::DeadlineWarning => {
            if let Some(mark) = DeadlineMark::from_fingerprint(&event.fingerprint) {
                state.last_deadline_notified = Some(mark);
            }
        }
        Trigger::Overdue => state.last_overdue_notified = Some(today),
        Trigger::Assigned
        | Trigger::StatusCritical
        | Trigger::Mentioned
        | Trigger::CommentOnOwned
        | Trigger::BlockerResolved => {}
    }
}

/// Snapshot refresh only: no dedupe key, no trigger marker.
pub fn touch(task: &mut Task) {
    Snapshot::of(task).apply_to(task);
}
