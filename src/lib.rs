//! nudge - task escalation and notification engine
//!
//! Decides which tasks deserve the user's attention and when to interrupt
//! them about it, without ever sending the same notification twice.
//!
//! # Core Concepts
//!
//! - **Score**: a task's priority from revenue, blocking, urgency, recency
//!   and its entity/workstream context
//! - **Escalation ladder**: days overdue mapped onto levels 0/1/2/3/5/7
//! - **Events**: typed triggers detected by diffing a task against its last
//!   observed snapshot, or classified from webhooks
//! - **Policy**: mode, score threshold and per-trigger switches
//! - **Dedupe ledger**: the last 50 notified event keys per task
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Process settings from `nudge.toml`
//! - `error`: Error types and result aliases
//! - `task`, `entity`: Data model
//! - `score`, `escalation`: Priority scoring and the overdue ladder
//! - `events`, `detect`, `webhook`, `sources`: Event model and detection
//! - `policy`: Notification policy (`notifications.yaml`) and the filter
//! - `state`: Notification-state commits
//! - `dispatch`: Escalation grouping and consolidation
//! - `send`: Message-send boundary with quiet hours and content dedupe
//! - `store`, `lock`: Task persistence with file locking and atomic writes
//! - `guard`: In-flight dedupe-key reservations
//! - `engine`: Poll, webhook and escalation cycles
//! - `clock`: Time source

pub mod cli;
pub mod clock;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod engine;
pub mod entity;
pub mod error;
pub mod escalation;
pub mod events;
pub mod guard;
pub mod lock;
pub mod output;
pub mod policy;
pub mod score;
pub mod send;
pub mod sources;
pub mod state;
pub mod store;
pub mod task;
pub mod webhook;

pub use error::{Error, Result};
