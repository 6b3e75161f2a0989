//! Notification filter: decides whether an event may interrupt the user.

use std::fmt;

use tracing::{debug, info};

use crate::events::{Event, Trigger};
use crate::task::NotificationState;

pub mod config;

pub use config::{ConfigHandle, Mode, NotificationConfig};

/// Outcome of the filter, with the reason when blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    ModeOff,
    TriggerDisabled(Trigger),
    BelowThreshold { score: i64, threshold: i64 },
    Duplicate(String),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => f.write_str("allow"),
            Verdict::ModeOff => f.write_str("mode is off"),
            Verdict::TriggerDisabled(trigger) => write!(f, "trigger {trigger} disabled"),
            Verdict::BelowThreshold { score, threshold } => {
                write!(f, "score {score} < threshold {threshold}")
            }
            Verdict::Duplicate(key) => write!(f, "duplicate event {key}"),
        }
    }
}

/// Evaluate an event against the policy and the task's dedupe ledger.
///
/// Threshold comparison is inclusive. Check order only affects which reason
/// is reported, never whether the event passes.
pub fn evaluate(
    config: &NotificationConfig,
    event: &Event,
    score: i64,
    state: &NotificationState,
) -> Verdict {
    let verdict = if config.mode == Mode::Off {
        Verdict::ModeOff
    } else if !config.is_enabled(event.trigger) {
        Verdict::TriggerDisabled(event.trigger)
    } else if !event.trigger.is_threshold_exempt() && score < config.threshold {
        Verdict::BelowThreshold {
            score,
            threshold: config.threshold,
        }
    } else {
        let key = event.dedupe_key();
        if state.dedupe_keys.contains(&key) {
            Verdict::Duplicate(key)
        } else {
            Verdict::Allow
        }
    };

    if verdict.is_allowed() {
        info!(trigger = %event.trigger, task = %event.task_id, "allowing notification");
    } else {
        debug!(trigger = %event.trigger, task = %event.task_id, reason = %verdict, "blocked notification");
    }
    verdict
}

pub fn should_notify(
    config: &NotificationConfig,
    event: &Event,
    score: i64,
    state: &NotificationState,
) -> bool {
    evaluate(config, event, score, state).is_allowed()
}
