//! nudge rank command implementation
//!
//! Scores every task in the store and lists them highest first.

use serde::Serialize;

use super::Context;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};
use crate::score::ScoreBreakdown;

pub struct RankOptions {
    pub all: bool,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct RankedTask {
    id: String,
    title: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<String>,
    score: ScoreBreakdown,
}

#[derive(Serialize)]
struct RankReport {
    total: usize,
    tasks: Vec<RankedTask>,
}

pub async fn run(ctx: &Context, options: RankOptions) -> Result<()> {
    let engine = ctx.engine()?;
    let ranked = engine.ranked().await?;

    let mut tasks: Vec<RankedTask> = ranked
        .into_iter()
        .filter(|(task, _)| options.all || task.is_open())
        .map(|(task, score)| RankedTask {
            due_date: task.due_date.map(|date| date.to_string()),
            id: task.id,
            title: task.title,
            status: task.status,
            score,
        })
        .collect();
    let total = tasks.len();
    if let Some(limit) = options.limit {
        tasks.truncate(limit);
    }

    let mut human = HumanOutput::new(format!("nudge rank: {total} task(s)"));
    for task in &tasks {
        human.push_detail(format!(
            "{:>6}  {}  {} [{}]",
            task.score.total, task.id, task.title, task.score.urgency_label
        ));
    }
    if tasks.len() < total {
        human.push_summary("shown", tasks.len().to_string());
    }

    emit_success(ctx.output, "rank", &RankReport { total, tasks }, Some(&human))
}
