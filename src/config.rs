//! Configuration loading and management
//!
//! Handles parsing of `nudge.toml` process settings. The notification policy
//! itself lives in a separate YAML file (see [`crate::policy::config`]) so it
//! can be edited and reloaded without touching these settings.

use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Default settings file name
pub const CONFIG_FILE: &str = "nudge.toml";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Task store (JSON) path
    #[serde(default = "default_store")]
    pub store: PathBuf,

    /// Outbox for message requests (JSONL); `-` for stdout
    #[serde(default = "default_outbox")]
    pub outbox: String,

    /// Notification policy file (YAML)
    #[serde(default = "default_notifications")]
    pub notifications: PathBuf,

    /// Upper bound on tasks processed concurrently
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Who gets notified
    #[serde(default)]
    pub identity: Identity,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours: Option<QuietHoursConfig>,

    #[serde(default)]
    pub webhooks: WebhookConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: default_store(),
            outbox: default_outbox(),
            notifications: default_notifications(),
            max_parallel: default_max_parallel(),
            identity: Identity::default(),
            schedule: ScheduleConfig::default(),
            quiet_hours: None,
            webhooks: WebhookConfig::default(),
        }
    }
}

fn default_store() -> PathBuf {
    PathBuf::from("tasks.json")
}

fn default_outbox() -> String {
    "-".to_string()
}

fn default_notifications() -> PathBuf {
    PathBuf::from("notifications.yaml")
}

fn default_max_parallel() -> usize {
    8
}

/// The notified user and how they are addressed in each tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Assignee name used by the sync layer
    #[serde(default = "default_user")]
    pub user: String,

    /// Mention handles searched for in comment bodies
    #[serde(default = "default_handles")]
    pub handles: Vec<String>,

    /// GitHub login used to recognise owned issues
    #[serde(default = "default_github_login")]
    pub github_login: String,
}

fn default_user() -> String {
    "ivan".to_string()
}

fn default_handles() -> Vec<String> {
    vec!["@ivanivanka".to_string(), "@ivan".to_string()]
}

fn default_github_login() -> String {
    "ivanivanka".to_string()
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            user: default_user(),
            handles: default_handles(),
            github_login: default_github_login(),
        }
    }
}

impl Identity {
    /// Whether a comment body addresses the user, by handle or by name.
    pub fn is_mentioned_in(&self, body: &str) -> bool {
        let lowered = body.to_lowercase();
        self.handles
            .iter()
            .any(|handle| lowered.contains(&handle.to_lowercase()))
            || lowered.contains(&self.user.to_lowercase())
    }
}

/// Cadence of the background loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_interval_secs")]
    pub escalation_interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    3600
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_interval_secs(),
            escalation_interval_secs: default_interval_secs(),
        }
    }
}

/// Quiet hours as `HH:MM` local times; `start > end` wraps midnight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuietHoursConfig {
    pub start: String,
    pub end: String,
}

impl QuietHoursConfig {
    pub fn bounds(&self) -> Result<(NaiveTime, NaiveTime)> {
        Ok((parse_clock(&self.start, "quiet_hours.start")?, parse_clock(&self.end, "quiet_hours.end")?))
    }
}

fn parse_clock(raw: &str, field: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|err| {
        Error::InvalidConfig(format!("{field}: invalid time '{raw}' (expected HH:MM): {err}"))
    })
}

/// Shared secrets for webhook signatures; empty disables verification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub github_secret: String,

    #[serde(default)]
    pub clickup_secret: String,
}

impl WebhookConfig {
    pub fn secret_for(&self, source: &str) -> Option<&str> {
        match source {
            "github" => Some(self.github_secret.as_str()),
            "clickup" => Some(self.clickup_secret.as_str()),
            _ => None,
        }
    }
}

impl Settings {
    /// Load configuration from a `nudge.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from `path`, or return defaults
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "invalid settings, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve relative paths against the directory holding the settings file
    pub fn rebase(mut self, root: &Path) -> Self {
        if self.store.is_relative() {
            self.store = root.join(&self.store);
        }
        if self.notifications.is_relative() {
            self.notifications = root.join(&self.notifications);
        }
        if self.outbox != "-" && Path::new(&self.outbox).is_relative() {
            self.outbox = root.join(&self.outbox).display().to_string();
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.identity.user.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "identity.user cannot be empty".to_string(),
            ));
        }
        if self.identity.handles.iter().any(|handle| handle.trim().is_empty()) {
            return Err(Error::InvalidConfig(
                "identity.handles cannot include empty entries".to_string(),
            ));
        }
        if self.max_parallel == 0 {
            return Err(Error::InvalidConfig(
                "max_parallel must be > 0".to_string(),
            ));
        }
        if self.schedule.poll_interval_secs == 0 || self.schedule.escalation_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "schedule intervals must be > 0".to_string(),
            ));
        }
        if let Some(quiet) = &self.quiet_hours {
            quiet.bounds()?;
        }
        Ok(())
    }
}
