//! Poll-driven event detection.
//!
//! Compares a task's live fields with the snapshot held in its
//! [`NotificationState`]. Every check is independent and several may fire in
//! one call. Detection is pure: calling it twice without an intervening
//! commit or touch yields the same events.

use chrono::NaiveDate;
use serde_json::Value;

use crate::events::{Event, Trigger};
use crate::task::{DeadlineMark, NotificationState, Task};

/// Statuses that interrupt the user on entry (compared case-insensitively).
pub const CRITICAL_STATUSES: [&str; 3] = ["blocked", "urgent", "critical"];

/// Fingerprint for the overdue event fired on `today`.
pub fn overdue_fingerprint(today: NaiveDate) -> String {
    format!("overdue:{today}")
}

/// Detect candidate events for `task`, as seen on `today` by `user`.
pub fn detect(task: &Task, user: &str, today: NaiveDate) -> Vec<Event> {
    let state = &task.notification_state;
    [
        check_deadline(task, state, today),
        check_overdue(task, state, today),
        check_status_critical(task, state),
        check_assigned(task, state, user),
        check_blocker_resolved(task, state),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn check_deadline(task: &Task, state: &NotificationState, today: NaiveDate) -> Option<Event> {
    let due = task.due_date?;
    let days_until = (due - today).num_days();
    let (mark, urgency) = match days_until {
        0 if state.last_deadline_notified != Some(DeadlineMark::DueToday) => {
            (DeadlineMark::DueToday, "today")
        }
        1 if state.last_deadline_notified.is_none() => (DeadlineMark::DayBefore, "tomorrow"),
        _ => return None,
    };
    Some(
        Event::new(Trigger::DeadlineWarning, &task.id, mark.fingerprint())
            .with("due_date", due.to_string())
            .with("urgency", urgency),
    )
}

fn check_overdue(task: &Task, state: &NotificationState, today: NaiveDate) -> Option<Event> {
    let due = task.due_date?;
    if due >= today || state.last_overdue_notified == Some(today) {
        return None;
    }
    Some(
        Event::new(Trigger::Overdue, &task.id, overdue_fingerprint(today))
            .with("due_date", due.to_string())
            .with("days_overdue", (today - due).num_days()),
    )
}

fn check_status_critical(task: &Task, state: &NotificationState) -> Option<Event> {
    let current = task.status.trim().to_lowercase();
    if !CRITICAL_STATUSES.contains(&current.as_str()) {
        return None;
    }
    let unchanged = state
        .prev_status
        .as_deref()
        .map(|prev| prev.trim().eq_ignore_ascii_case(&current))
        .unwrap_or(false);
    if unchanged {
        return None;
    }
    Some(
        Event::new(Trigger::StatusCritical, &task.id, format!("status={current}"))
            .with("new_status", current.clone())
            .with("prev_status", optional(state.prev_status.as_deref())),
    )
}

fn check_assigned(task: &Task, state: &NotificationState, user: &str) -> Option<Event> {
    if !task.is_assigned_to(user) || state.prev_assignee.as_deref() == Some(user) {
        return None;
    }
    Some(
        Event::new(Trigger::Assigned, &task.id, format!("assignee={user}"))
            .with("prev_assignee", optional(state.prev_assignee.as_deref())),
    )
}

fn check_blocker_resolved(task: &Task, state: &NotificationState) -> Option<Event> {
    if state.prev_blocked_by.is_empty() || !task.blocked_by.is_empty() {
        return None;
    }
    let resolved: Vec<Value> = state
        .prev_blocked_by
        .iter()
        .map(|id| Value::String(id.clone()))
        .collect();
    Some(
        Event::new(Trigger::BlockerResolved, &task.id, "unblocked")
            .with("resolved_blockers", resolved),
    )
}

fn optional(value: Option<&str>) -> Value {
    value.map(|v| Value::String(v.to_string())).unwrap_or(Value::Null)
}
