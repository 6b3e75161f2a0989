//! nudge webhook command implementation
//!
//! Feeds one recorded webhook delivery through the engine, as an HTTP front
//! end would.

use std::path::PathBuf;

use super::Context;
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::webhook::WebhookSource;

pub struct WebhookOptions {
    pub source: String,
    pub event: String,
    pub payload: PathBuf,
    pub signature: Option<String>,
}

pub async fn run(ctx: &Context, options: WebhookOptions) -> Result<()> {
    let source: WebhookSource = options
        .source
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("unknown webhook source '{}'", options.source)))?;
    let body = std::fs::read(&options.payload)?;

    let engine = ctx.engine()?;
    let report = engine
        .handle_webhook(source, &options.event, &body, options.signature.as_deref())
        .await?;

    let header = match (&report.ignored, &report.outcome) {
        (Some(reason), _) => format!("nudge webhook: ignored ({reason})"),
        (None, Some(outcome)) if outcome.sent > 0 => {
            format!("nudge webhook: {} notification(s) sent", outcome.sent)
        }
        _ => "nudge webhook: nothing to send".to_string(),
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("source", report.source.clone());
    human.push_summary("event", report.event_type.clone());
    if let Some(task_id) = &report.task_id {
        human.push_summary("task", task_id.clone());
    }
    if let Some(key) = &report.event {
        human.push_detail(format!("classified as {key}"));
    }
    if let Some(update) = &report.update {
        if let Some(status) = &update.status {
            human.push_detail(format!("status -> {status}"));
        }
        if let Some(title) = &update.title {
            human.push_detail(format!("title -> {title}"));
        }
    }
    if let Some(outcome) = &report.outcome {
        for error in &outcome.errors {
            human.push_warning(error.clone());
        }
    }

    emit_success(ctx.output, "webhook", &report, Some(&human))
}
