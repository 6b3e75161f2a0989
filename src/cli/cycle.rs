//! nudge cycle / escalate / watch

use std::time::Duration;

use tracing::info;

use super::Context;
use crate::engine::{CycleReport, EscalationReport};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};

pub struct WatchOptions {
    pub poll_secs: Option<u64>,
    pub escalate_secs: Option<u64>,
}

pub async fn run_poll(ctx: &Context) -> Result<()> {
    let engine = ctx.engine()?;
    let report = engine.poll_cycle().await?;
    emit_success(ctx.output, "cycle", &report, Some(&poll_human(&report)))
}

pub async fn run_escalate(ctx: &Context) -> Result<()> {
    let engine = ctx.engine()?;
    let report = engine.escalation_cycle().await?;
    emit_success(ctx.output, "escalate", &report, Some(&escalation_human(&report)))
}

pub async fn run_watch(ctx: &Context, options: WatchOptions) -> Result<()> {
    let schedule = &ctx.settings.schedule;
    let poll_secs = options.poll_secs.unwrap_or(schedule.poll_interval_secs);
    let escalate_secs = options.escalate_secs.unwrap_or(schedule.escalation_interval_secs);
    if poll_secs == 0 || escalate_secs == 0 {
        return Err(Error::InvalidArgument("intervals must be > 0".to_string()));
    }

    let engine = ctx.engine()?;
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
        }
    };
    engine
        .run(
            Duration::from_secs(poll_secs),
            Duration::from_secs(escalate_secs),
            shutdown,
        )
        .await?;

    #[derive(serde::Serialize)]
    struct WatchReport {
        poll_secs: u64,
        escalate_secs: u64,
    }
    let mut human = HumanOutput::new("nudge watch: stopped");
    human.push_summary("poll interval", format!("{poll_secs}s"));
    human.push_summary("escalation interval", format!("{escalate_secs}s"));
    emit_success(
        ctx.output,
        "watch",
        &WatchReport {
            poll_secs,
            escalate_secs,
        },
        Some(&human),
    )
}

fn poll_human(report: &CycleReport) -> HumanOutput {
    let header = if report.sent > 0 {
        format!("nudge cycle: {} notification(s) sent", report.sent)
    } else {
        "nudge cycle: nothing to send".to_string()
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("tasks", report.tasks.to_string());
    human.push_summary("detected", report.detected.to_string());
    human.push_summary("blocked", report.blocked.to_string());
    if report.suppressed > 0 {
        human.push_summary("suppressed", report.suppressed.to_string());
    }
    if report.deferred > 0 {
        human.push_summary("deferred", report.deferred.to_string());
        human.push_next_step("deferred events are retried on the next cycle");
    }
    for outcome in &report.outcomes {
        human.push_detail(format!(
            "{} (score {}): {} detected, {} sent, {} blocked",
            outcome.task_id, outcome.score, outcome.detected, outcome.sent, outcome.blocked
        ));
    }
    for error in &report.errors {
        human.push_warning(error.clone());
    }
    human
}

fn escalation_human(report: &EscalationReport) -> HumanOutput {
    let header = if report.notices.is_empty() {
        "nudge escalate: nothing to escalate".to_string()
    } else {
        format!("nudge escalate: {} notice(s)", report.notices.len())
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("eligible", report.eligible.to_string());
    human.push_summary("accepted", report.accepted.to_string());
    human.push_summary("blocked", report.blocked.to_string());
    for notice in &report.notices {
        let shape = if notice.grouped { "grouped" } else { "individual" };
        human.push_detail(format!(
            "level {} {shape} ({}): {}",
            notice.level,
            notice.delivery,
            notice.task_ids.join(", ")
        ));
    }
    for error in &report.errors {
        human.push_warning(error.clone());
    }
    human
}
