//! Webhook classification and signature verification.
//!
//! Payloads are loosely typed JSON from GitHub and ClickUp. Anything that
//! cannot be classified yields `None`; nothing in here returns an error.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

use crate::config::Identity;
use crate::events::{Event, Trigger};
use crate::sources::{self, IssueLinks};
use crate::task::{Task, DONE_STATUS};

type HmacSha256 = Hmac<Sha256>;

/// Characters of a comment body carried in event context.
pub const BODY_PREVIEW_CHARS: usize = 100;

/// Status given to reopened or otherwise not-finished tasks.
pub const REOPENED_STATUS: &str = "todo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookSource {
    GitHub,
    ClickUp,
}

impl WebhookSource {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookSource::GitHub => "github",
            WebhookSource::ClickUp => "clickup",
        }
    }
}

impl fmt::Display for WebhookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookSource {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(WebhookSource::GitHub),
            "clickup" => Ok(WebhookSource::ClickUp),
            other => Err(format!("unknown webhook source '{other}' (expected github|clickup)")),
        }
    }
}

/// Check an HMAC-SHA256 signature over the raw request body.
///
/// GitHub sends `sha256=<hex>`, ClickUp sends bare hex. An empty secret
/// disables verification.
pub fn verify_signature(source: WebhookSource, body: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    let hex_digest = match source {
        WebhookSource::GitHub => match signature.strip_prefix("sha256=") {
            Some(rest) => rest,
            None => return false,
        },
        WebhookSource::ClickUp => signature,
    };
    let Ok(expected) = hex::decode(hex_digest.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Hex HMAC-SHA256 of `body` in the form `source` sends it.
pub fn sign(source: WebhookSource, body: &[u8], secret: &str) -> String {
    let digest = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    };
    match source {
        WebhookSource::GitHub => format!("sha256={digest}"),
        WebhookSource::ClickUp => digest,
    }
}

/// Classify a comment webhook into `mentioned` or `comment_on_owned`.
pub fn parse_webhook(
    source: WebhookSource,
    event_type: &str,
    payload: &Value,
    identity: &Identity,
) -> Option<Event> {
    debug!(source = %source, event = event_type, "classifying webhook");
    match source {
        WebhookSource::GitHub => parse_github(event_type, payload, identity),
        WebhookSource::ClickUp => parse_clickup(event_type, payload, identity),
    }
}

fn parse_github(event_type: &str, payload: &Value, identity: &Identity) -> Option<Event> {
    if event_type != "issue_comment" || payload.get("action")?.as_str()? != "created" {
        return None;
    }
    let issue = payload.get("issue")?;
    let comment = payload.get("comment")?;
    let task_id = format!("github:{}", scalar(issue.get("number")?)?);
    let comment_id = scalar(comment.get("id")?)?;
    let commenter = comment
        .pointer("/user/login")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let body = comment.get("body").and_then(Value::as_str).unwrap_or("");

    let trigger = if identity.is_mentioned_in(body) {
        Trigger::Mentioned
    } else if issue.pointer("/assignee/login").and_then(Value::as_str)
        == Some(identity.github_login.as_str())
    {
        Trigger::CommentOnOwned
    } else {
        return None;
    };
    Some(comment_event(trigger, task_id, &comment_id, commenter, body))
}

fn parse_clickup(event_type: &str, payload: &Value, identity: &Identity) -> Option<Event> {
    if event_type != "taskCommentPosted" {
        return None;
    }
    let task_id = format!("clickup:{}", clickup_task_id(payload)?);
    let comment = payload.pointer("/history_items/0/comment")?;
    let comment_id = comment
        .get("id")
        .and_then(scalar)
        .unwrap_or_else(|| "unknown".to_string());
    let commenter = comment
        .pointer("/user/username")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let body = comment
        .get("text_content")
        .and_then(Value::as_str)
        .unwrap_or("");

    // ClickUp comment payloads carry no assignee; the hook is only
    // registered on the user's own lists.
    let trigger = if identity.is_mentioned_in(body) {
        Trigger::Mentioned
    } else {
        Trigger::CommentOnOwned
    };
    Some(comment_event(trigger, task_id, &comment_id, commenter, body))
}

fn comment_event(
    trigger: Trigger,
    task_id: String,
    comment_id: &str,
    commenter: &str,
    body: &str,
) -> Event {
    Event::new(trigger, task_id, format!("comment_id={comment_id}"))
        .with("commenter", commenter)
        .with("body_preview", preview(body))
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

fn clickup_task_id(payload: &Value) -> Option<String> {
    payload
        .get("task_id")
        .and_then(scalar)
        .or_else(|| payload.pointer("/task/id").and_then(scalar))
        .filter(|id| !id.is_empty())
}

/// Render a string or integer id; other JSON types are not ids.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Field changes a webhook asks to apply to a stored task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskUpdate {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Blockers read from an edited GitHub issue body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<IssueLinks>,
}

impl TaskUpdate {
    /// Apply to the stored task; returns whether anything changed.
    pub fn apply(&self, task: &mut Task) -> bool {
        let mut changed = false;
        if let Some(status) = &self.status {
            if &task.status != status {
                task.status = status.clone();
                changed = true;
            }
        }
        if let Some(title) = &self.title {
            if &task.title != title {
                task.title = title.clone();
                changed = true;
            }
        }
        if let Some(links) = &self.links {
            changed |= links.apply(task);
        }
        changed
    }
}

/// Extract a status/title change from issue and status webhooks.
pub fn task_update(source: WebhookSource, event_type: &str, payload: &Value) -> Option<TaskUpdate> {
    match source {
        WebhookSource::GitHub => {
            if event_type != "issues" {
                return None;
            }
            let issue = payload.get("issue")?;
            let task_id = format!("github:{}", scalar(issue.get("number")?)?);
            let mut update = TaskUpdate {
                task_id,
                status: None,
                title: None,
                links: None,
            };
            match payload.get("action")?.as_str()? {
                "closed" => update.status = Some(DONE_STATUS.to_string()),
                "reopened" => update.status = Some(REOPENED_STATUS.to_string()),
                "edited" => {
                    update.title = issue.get("title").and_then(Value::as_str).map(str::to_string);
                    update.links = issue
                        .get("body")
                        .and_then(Value::as_str)
                        .map(sources::github_issue_links);
                    if update.title.is_none() && update.links.is_none() {
                        return None;
                    }
                }
                _ => return None,
            }
            Some(update)
        }
        WebhookSource::ClickUp => {
            if event_type != "taskStatusUpdated" {
                return None;
            }
            let task_id = format!("clickup:{}", clickup_task_id(payload)?);
            let raw = payload
                .pointer("/history_items/0/after/status")
                .and_then(Value::as_str)?;
            let status = match raw.trim().to_lowercase().as_str() {
                "complete" | "closed" | "done" => DONE_STATUS,
                _ => REOPENED_STATUS,
            };
            Some(TaskUpdate {
                task_id,
                status: Some(status.to_string()),
                title: None,
                links: None,
            })
        }
    }
}
