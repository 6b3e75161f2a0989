//! Notification policy configuration
//!
//! Handles parsing of `notifications.yaml`:
//!
//! ```yaml
//! mode: focus          # focus | full | off
//! threshold: 500       # score floor for non time-sensitive triggers
//! triggers:
//!   comment_on_owned: true
//!   blocker_resolved: false
//! ```
//!
//! A missing or unreadable file yields the defaults. Unknown trigger names
//! are skipped without rejecting the rest of the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::Trigger;

pub const DEFAULT_THRESHOLD: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Focus,
    Full,
    Off,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "focus" => Ok(Mode::Focus),
            "full" => Ok(Mode::Full),
            "off" => Ok(Mode::Off),
            other => Err(format!("invalid mode '{other}' (expected focus|full|off)")),
        }
    }
}

/// Process-wide notification policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationConfig {
    pub mode: Mode,
    pub threshold: i64,
    pub triggers: BTreeMap<Trigger, bool>,
}

fn default_triggers() -> BTreeMap<Trigger, bool> {
    Trigger::ALL
        .into_iter()
        // Comments on owned tasks are noisy; opt-in only.
        .map(|trigger| (trigger, trigger != Trigger::CommentOnOwned))
        .collect()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            threshold: DEFAULT_THRESHOLD,
            triggers: default_triggers(),
        }
    }
}

/// On-disk shape; loose so a single bad entry does not sink the file.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    threshold: Option<i64>,
    #[serde(default)]
    triggers: BTreeMap<String, serde_yaml::Value>,
}

impl NotificationConfig {
    pub fn is_enabled(&self, trigger: Trigger) -> bool {
        self.triggers.get(&trigger).copied().unwrap_or(false)
    }

    /// Parse YAML text on top of the defaults.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: Option<RawConfig> = serde_yaml::from_str(content)?;
        let raw = raw.unwrap_or_default();
        let mut config = NotificationConfig::default();

        if let Some(mode) = raw.mode {
            config.mode = mode.parse().map_err(Error::InvalidConfig)?;
        }
        if let Some(threshold) = raw.threshold {
            config.threshold = threshold;
        }
        for (name, value) in raw.triggers {
            let Ok(trigger) = name.parse::<Trigger>() else {
                debug!(trigger = %name, "ignoring unknown trigger in notification config");
                continue;
            };
            match value.as_bool() {
                Some(enabled) => {
                    config.triggers.insert(trigger, enabled);
                }
                None => warn!(trigger = %name, "ignoring non-boolean trigger flag"),
            }
        }

        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load from `path`, falling back to defaults when missing or invalid
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "notification config not found, using defaults");
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                info!(path = %path.display(), "loaded notification config");
                config
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "invalid notification config, using defaults");
                Self::default()
            }
        }
    }
}

/// Shared, reloadable handle to the current policy.
///
/// Readers take a snapshot; a reload swaps the snapshot without waiting for
/// in-flight decisions, which keep the value they started with.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: Arc<RwLock<Arc<NotificationConfig>>>,
}

impl ConfigHandle {
    /// Load once from `path`; later `reload` calls re-read it.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = NotificationConfig::load_or_default(&path);
        Self {
            path: Some(path),
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// A fixed policy with nothing to reload from.
    pub fn fixed(config: NotificationConfig) -> Self {
        Self {
            path: None,
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn snapshot(&self) -> Arc<NotificationConfig> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Re-read the backing file and return the new snapshot.
    pub fn reload(&self) -> Arc<NotificationConfig> {
        let Some(path) = &self.path else {
            return self.snapshot();
        };
        self.replace(NotificationConfig::load_or_default(path))
    }

    pub fn replace(&self, config: NotificationConfig) -> Arc<NotificationConfig> {
        let fresh = Arc::new(config);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&fresh),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&fresh),
        }
        fresh
    }
}
