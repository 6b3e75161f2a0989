//! nudge config command implementation

use std::path::PathBuf;

use serde::Serialize;

use super::Context;
use crate::config::Settings;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};
use crate::policy::NotificationConfig;

#[derive(Serialize)]
struct ConfigReport<'a> {
    settings_path: &'a PathBuf,
    settings_found: bool,
    settings: &'a Settings,
    policy_found: bool,
    policy: &'a NotificationConfig,
}

pub fn run(ctx: &Context) -> Result<()> {
    let settings = &ctx.settings;
    let policy = ctx.policy().snapshot();
    let policy_found = settings.notifications.exists();
    let report = ConfigReport {
        settings_path: &ctx.settings_path,
        settings_found: ctx.settings_path.exists(),
        settings,
        policy_found,
        policy: &policy,
    };

    let mut human = HumanOutput::new("nudge config");
    human.push_summary("settings", ctx.settings_path.display().to_string());
    human.push_summary("store", settings.store.display().to_string());
    human.push_summary("outbox", settings.outbox.clone());
    human.push_summary("user", settings.identity.user.clone());
    human.push_summary("mode", format!("{:?}", policy.mode).to_lowercase());
    human.push_summary("threshold", policy.threshold.to_string());
    for (trigger, enabled) in &policy.triggers {
        let state = if *enabled { "on" } else { "off" };
        human.push_detail(format!("{trigger}: {state}"));
    }
    if let Some(quiet) = &settings.quiet_hours {
        human.push_summary("quiet hours", format!("{}-{}", quiet.start, quiet.end));
    }
    if !report.settings_found {
        human.push_warning(format!("{} not found, using defaults", ctx.settings_path.display()));
    }
    if !policy_found {
        human.push_warning(format!(
            "{} not found, using default policy",
            settings.notifications.display()
        ));
    }

    emit_success(ctx.output, "config", &report, Some(&human))
}
