//! Task fields recovered from tracker free text.
//!
//! GitHub has no native dependency links, so blockers are read from issue
//! bodies: `Blocked by #N` names a blocking issue, `Blocks #N` only says that
//! someone is waiting. Who is waiting is not recoverable from the text, so
//! such issues get the opaque person [`UNKNOWN_BLOCKED_PERSON`].

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::task::Task;

pub const UNKNOWN_BLOCKED_PERSON: &str = "unknown";

fn blocked_by_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[Bb]locked\s+by\s+#(\d+)").expect("valid regex"))
}

fn blocks_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[Bb]locks\s+#(\d+)").expect("valid regex"))
}

/// Blocking relationships found in a GitHub issue body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueLinks {
    pub blocked_by: BTreeSet<String>,
    pub is_blocking: BTreeSet<String>,
}

impl IssueLinks {
    /// Replace the task's blocker fields; returns whether anything changed.
    pub fn apply(&self, task: &mut Task) -> bool {
        if task.blocked_by == self.blocked_by && task.is_blocking == self.is_blocking {
            return false;
        }
        task.blocked_by = self.blocked_by.clone();
        task.is_blocking = self.is_blocking.clone();
        true
    }
}

pub fn github_issue_links(body: &str) -> IssueLinks {
    let blocked_by = blocked_by_pattern()
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|number| format!("github:{}", number.as_str()))
        .collect();

    let mut is_blocking = BTreeSet::new();
    if blocks_pattern().is_match(body) {
        is_blocking.insert(UNKNOWN_BLOCKED_PERSON.to_string());
    }
    IssueLinks {
        blocked_by,
        is_blocking,
    }
}
