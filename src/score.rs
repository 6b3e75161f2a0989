//! Priority scoring.
//!
//! ```text
//! score = 1000 * revenue
//!       +  500 * |is_blocking|
//!       +  100 * urgency(due_date)
//!       +    1 * (activity in last 24h)
//!       +   50 * urgency(workstream.deadline)   (when mapped to a workstream)
//!       +   25 * entity.priority                (when mapped to an entity)
//! ```
//!
//! Urgency is deliberately non-linear: overdue 5, due today 4, due within a
//! week 3, anything else (including no date) 1. Two blocked people (1000)
//! weigh the same as revenue (1000), so blocking work that is due sooner
//! outranks revenue work that is not.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::entity::{Entity, Workstream};
use crate::task::Task;

pub const REVENUE_WEIGHT: i64 = 1000;
pub const BLOCKING_WEIGHT: i64 = 500;
pub const URGENCY_WEIGHT: i64 = 100;
pub const RECENCY_BONUS: i64 = 1;
pub const WORKSTREAM_WEIGHT: i64 = 50;
pub const ENTITY_WEIGHT: i64 = 25;

/// Urgency tier for a due date relative to `today`. Always one of 1, 3, 4, 5.
pub fn urgency(due_date: Option<NaiveDate>, today: NaiveDate) -> i64 {
    let Some(due) = due_date else {
        return 1;
    };
    let days_until = (due - today).num_days();
    if days_until < 0 {
        5
    } else if days_until == 0 {
        4
    } else if days_until <= 7 {
        3
    } else {
        1
    }
}

pub fn urgency_label(due_date: Option<NaiveDate>, today: NaiveDate) -> &'static str {
    match urgency(due_date, today) {
        5 => "Overdue",
        4 => "Due today",
        3 => "Due this week",
        _ if due_date.is_none() => "No deadline",
        _ => "Future",
    }
}

/// Optional relationship context for a task.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreContext<'a> {
    pub entity: Option<&'a Entity>,
    pub workstream: Option<&'a Workstream>,
}

/// Every addend of a score, for debugging and display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub total: i64,
    pub revenue: i64,
    pub blocking: i64,
    pub blocking_count: usize,
    pub urgency: i64,
    pub urgency_level: i64,
    pub urgency_label: &'static str,
    pub recency: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workstream: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workstream_urgency_level: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_priority: Option<i64>,
}

/// Score a task. Returns the breakdown; `breakdown.total` is the score.
pub fn score(
    task: &Task,
    context: ScoreContext<'_>,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let revenue = if task.is_revenue { REVENUE_WEIGHT } else { 0 };

    let blocking_count = task.is_blocking.len();
    let blocking = BLOCKING_WEIGHT * blocking_count as i64;

    let urgency_level = urgency(task.due_date, today);
    let urgency_points = URGENCY_WEIGHT * urgency_level;

    let recency = match task.last_activity {
        Some(at) if now - at < Duration::hours(24) => RECENCY_BONUS,
        _ => 0,
    };

    let workstream_urgency_level = context
        .workstream
        .map(|ws| urgency(ws.deadline, today));
    let workstream = workstream_urgency_level.map(|level| WORKSTREAM_WEIGHT * level);

    let entity_priority = context.entity.map(Entity::priority);
    let entity = entity_priority.map(|priority| ENTITY_WEIGHT * priority);

    let total = revenue
        + blocking
        + urgency_points
        + recency
        + workstream.unwrap_or(0)
        + entity.unwrap_or(0);

    ScoreBreakdown {
        total,
        revenue,
        blocking,
        blocking_count,
        urgency: urgency_points,
        urgency_level,
        urgency_label: urgency_label(task.due_date, today),
        recency,
        workstream,
        workstream_urgency_level,
        entity,
        entity_priority,
    }
}

/// Score every task and sort highest first (ties broken by id).
///
/// Returns each task paired with its breakdown; the cached `score` field on
/// the returned tasks is refreshed.
pub fn rank<'a, F>(
    tasks: Vec<Task>,
    mut context_for: F,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Vec<(Task, ScoreBreakdown)>
where
    F: FnMut(&Task) -> ScoreContext<'a>,
{
    let mut ranked: Vec<(Task, ScoreBreakdown)> = tasks
        .into_iter()
        .map(|mut task| {
            let breakdown = score(&task, context_for(&task), today, now);
            task.score = breakdown.total;
            (task, breakdown)
        })
        .collect();
    ranked.sort_by(|(left, lb), (right, rb)| {
        rb.total.cmp(&lb.total).then_with(|| left.id.cmp(&right.id))
    });
    ranked
}
