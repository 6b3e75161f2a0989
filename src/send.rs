//! Message-send boundary.
//!
//! The engine hands [`MessageRequest`]s to a [`Notifier`]. Rendering and
//! the chat API live behind it. [`JsonlNotifier`] writes requests as JSON
//! lines for a downstream renderer; [`GatedNotifier`] wraps any notifier with
//! quiet hours and duplicate-content suppression.

use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveTime;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::QuietHoursConfig;
use crate::error::{Error, Result};
use crate::events::MessageRequest;

/// Content hashes remembered for duplicate suppression.
pub const CONTENT_HASH_MEMORY: usize = 1024;

/// What happened to a request at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Held back for now; the event stays eligible and is retried later.
    Deferred(String),
    /// Not sent because the user already has an identical message.
    Suppressed(String),
}

impl Delivery {
    /// Whether the covered events count as notified.
    pub fn is_final(&self) -> bool {
        !matches!(self, Delivery::Deferred(_))
    }
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn deliver(&self, request: &MessageRequest) -> Result<Delivery>;
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn deliver(&self, request: &MessageRequest) -> Result<Delivery> {
        (**self).deliver(request).await
    }
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Box<N> {
    async fn deliver(&self, request: &MessageRequest) -> Result<Delivery> {
        (**self).deliver(request).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxDestination {
    Stdout,
    File(PathBuf),
}

impl OutboxDestination {
    /// `-` is stdout; empty means no outbox.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == "-" {
            return Some(OutboxDestination::Stdout);
        }
        Some(OutboxDestination::File(PathBuf::from(trimmed)))
    }

    pub fn open(&self) -> Result<JsonlNotifier> {
        match self {
            OutboxDestination::Stdout => Ok(JsonlNotifier::stdout()),
            OutboxDestination::File(path) => JsonlNotifier::file(path),
        }
    }

    fn label(&self) -> String {
        match self {
            OutboxDestination::Stdout => "stdout".to_string(),
            OutboxDestination::File(path) => path.display().to_string(),
        }
    }
}

/// Appends each request as one JSON line.
pub struct JsonlNotifier {
    target: String,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlNotifier {
    pub fn stdout() -> Self {
        Self {
            target: OutboxDestination::Stdout.label(),
            writer: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    /// Append to a file, creating it and its directory if needed.
    pub fn file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            target: OutboxDestination::File(path.to_path_buf()).label(),
            writer: Mutex::new(Box::new(file)),
        })
    }

    fn write_line(&self, line: &[u8]) -> std::io::Result<()> {
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writer.write_all(line)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

#[async_trait]
impl Notifier for JsonlNotifier {
    async fn deliver(&self, request: &MessageRequest) -> Result<Delivery> {
        let line = serde_json::to_vec(request)?;
        self.write_line(&line).map_err(|err| Error::SendFailed {
            target: self.target.clone(),
            reason: err.to_string(),
        })?;
        Ok(Delivery::Sent)
    }
}

/// A daily window, in local time, during which nothing is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn from_config(config: &QuietHoursConfig) -> Result<Self> {
        let (start, end) = config.bounds()?;
        Ok(Self { start, end })
    }

    /// Start inclusive, end exclusive; `start > end` wraps past midnight.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// SHA-256 over the message body, ignoring request id and timestamp.
pub fn content_hash(request: &MessageRequest) -> Result<String> {
    let body = serde_json::to_vec(&request.body)?;
    Ok(hex::encode(Sha256::digest(&body)))
}

#[derive(Debug, Default)]
struct SeenHashes {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl SeenHashes {
    fn contains(&self, hash: &str) -> bool {
        self.set.contains(hash)
    }

    fn insert(&mut self, hash: String) {
        if !self.set.insert(hash.clone()) {
            return;
        }
        self.order.push_back(hash);
        while self.order.len() > CONTENT_HASH_MEMORY {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
    }
}

/// Applies quiet hours and duplicate-content suppression before `inner`.
pub struct GatedNotifier<N> {
    inner: N,
    quiet_hours: Option<QuietHours>,
    clock: Arc<dyn Clock>,
    seen: Mutex<SeenHashes>,
}

impl<N: Notifier> GatedNotifier<N> {
    pub fn new(inner: N, quiet_hours: Option<QuietHours>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            quiet_hours,
            clock,
            seen: Mutex::new(SeenHashes::default()),
        }
    }

    fn seen(&self) -> std::sync::MutexGuard<'_, SeenHashes> {
        match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl<N: Notifier> Notifier for GatedNotifier<N> {
    async fn deliver(&self, request: &MessageRequest) -> Result<Delivery> {
        if let Some(quiet) = self.quiet_hours {
            let time = self.clock.time_of_day();
            if quiet.contains(time) {
                debug!(request = %request.request_id, %time, "deferring during quiet hours");
                return Ok(Delivery::Deferred(format!(
                    "quiet hours {}-{}",
                    quiet.start.format("%H:%M"),
                    quiet.end.format("%H:%M")
                )));
            }
        }

        let hash = content_hash(request)?;
        if self.seen().contains(&hash) {
            debug!(request = %request.request_id, hash = %hash, "suppressing duplicate content");
            return Ok(Delivery::Suppressed(format!("duplicate content {}", &hash[..12])));
        }

        let delivery = self.inner.deliver(request).await?;
        if delivery == Delivery::Sent {
            info!(request = %request.request_id, tasks = ?request.body.task_ids(), "delivered message");
            self.seen().insert(hash);
        }
        Ok(delivery)
    }
}
