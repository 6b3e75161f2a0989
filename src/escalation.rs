//! Overdue escalation ladder.
//!
//! | days overdue | level | treatment                      |
//! |--------------|-------|--------------------------------|
//! | 0            | 0     | morning briefing only          |
//! | 1            | 1     | flagged in briefing            |
//! | 2            | 2     | afternoon digest               |
//! | 3-4          | 3     | individual message             |
//! | 5-6          | 5     | delegate-or-kill prompt        |
//! | 7+           | 7     | final warning                  |

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EscalationLevel {
    OnTrack,
    Flagged,
    Digest,
    Individual,
    Prompt,
    FinalWarning,
}

impl EscalationLevel {
    /// Step function over days overdue.
    pub fn from_days_overdue(days: i64) -> Self {
        match days {
            i64::MIN..=0 => EscalationLevel::OnTrack,
            1 => EscalationLevel::Flagged,
            2 => EscalationLevel::Digest,
            3..=4 => EscalationLevel::Individual,
            5..=6 => EscalationLevel::Prompt,
            _ => EscalationLevel::FinalWarning,
        }
    }

    /// Numeric level, one of 0, 1, 2, 3, 5, 7.
    pub fn value(self) -> u8 {
        match self {
            EscalationLevel::OnTrack => 0,
            EscalationLevel::Flagged => 1,
            EscalationLevel::Digest => 2,
            EscalationLevel::Individual => 3,
            EscalationLevel::Prompt => 5,
            EscalationLevel::FinalWarning => 7,
        }
    }

    /// Levels that warrant their own message rather than a briefing mention.
    pub fn notifies_individually(self) -> bool {
        self >= EscalationLevel::Individual
    }

    pub fn message(self) -> String {
        message_for(self.value())
    }
}

impl From<EscalationLevel> for u8 {
    fn from(level: EscalationLevel) -> Self {
        level.value()
    }
}

impl TryFrom<u8> for EscalationLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(EscalationLevel::OnTrack),
            1 => Ok(EscalationLevel::Flagged),
            2 => Ok(EscalationLevel::Digest),
            3 => Ok(EscalationLevel::Individual),
            5 => Ok(EscalationLevel::Prompt),
            7 => Ok(EscalationLevel::FinalWarning),
            other => Err(format!("invalid escalation level {other}")),
        }
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Fixed prose for a level; levels without their own text get a generic line.
pub fn message_for(level: u8) -> String {
    match level {
        3 => "3 days overdue".to_string(),
        5 => "5 days overdue - should I delegate or kill it?".to_string(),
        7 => "7+ days overdue - removing from active list unless you respond".to_string(),
        other => format!("{other} days overdue"),
    }
}

/// `max(0, today - due)`, or 0 without a due date.
pub fn days_overdue(due_date: Option<NaiveDate>, today: NaiveDate) -> i64 {
    due_date
        .map(|due| (today - due).num_days().max(0))
        .unwrap_or(0)
}

pub fn level(task: &Task, today: NaiveDate) -> EscalationLevel {
    EscalationLevel::from_days_overdue(days_overdue(task.due_date, today))
}

pub fn should_notify_individually(task: &Task, today: NaiveDate) -> bool {
    level(task, today).notifies_individually()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn overdue_by(days: i64) -> Task {
        let mut task = Task::new(format!("test:{days}"), "todo");
        task.due_date = Some(today() - Duration::days(days));
        task
    }

    #[test]
    fn days_overdue_clamps_at_zero() {
        assert_eq!(days_overdue(None, today()), 0);
        assert_eq!(days_overdue(Some(today()), today()), 0);
        assert_eq!(days_overdue(Some(today() + Duration::days(5)), today()), 0);
        assert_eq!(days_overdue(Some(today() - Duration::days(1)), today()), 1);
        assert_eq!(days_overdue(Some(today() - Duration::days(5)), today()), 5);
    }

    #[test]
    fn ladder_boundaries() {
        let expected = [
            (0, 0),
            (1, 1),
            (2, 2),
            (3, 3),
            (4, 3),
            (5, 5),
            (6, 5),
            (7, 7),
            (30, 7),
        ];
        for (days, value) in expected {
            assert_eq!(level(&overdue_by(days), today()).value(), value, "{days} days");
        }
    }

    #[test]
    fn ladder_is_monotonic() {
        let mut previous = EscalationLevel::OnTrack;
        for days in 0..40 {
            let current = EscalationLevel::from_days_overdue(days);
            assert!(current >= previous);
            assert!(current.value() >= previous.value());
            previous = current;
        }
    }

    #[test]
    fn individual_from_level_three() {
        assert!(!should_notify_individually(&overdue_by(2), today()));
        assert!(should_notify_individually(&overdue_by(3), today()));
        assert!(should_notify_individually(&overdue_by(9), today()));
        assert!(!should_notify_individually(&Task::new("x:1", "todo"), today()));
    }

    #[test]
    fn prose_per_level() {
        assert_eq!(EscalationLevel::Individual.message(), "3 days overdue");
        assert!(EscalationLevel::Prompt.message().contains("delegate or kill"));
        assert!(EscalationLevel::FinalWarning.message().starts_with("7+ days overdue"));
        assert_eq!(message_for(2), "2 days overdue");
    }

    #[test]
    fn serializes_as_number() {
        let json = serde_json::to_string(&EscalationLevel::Prompt).unwrap();
        assert_eq!(json, "5");
        let back: EscalationLevel = serde_json::from_str("7").unwrap();
        assert_eq!(back, EscalationLevel::FinalWarning);
        assert!(serde_json::from_str::<EscalationLevel>("4").is_err());
    }
}
