//! Command-line interface for nudge
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is defined in its own submodule.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::clock::{Clock, SystemClock};
use crate::config::{Settings, CONFIG_FILE};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::output::OutputOptions;
use crate::policy::ConfigHandle;
use crate::send::{GatedNotifier, JsonlNotifier, OutboxDestination, QuietHours};
use crate::store::JsonFileStore;

mod config;
mod cycle;
mod rank;
mod webhook;

/// nudge - task escalation and notification engine
///
/// Scores tasks, detects notification-worthy changes, filters them against
/// the notification policy and writes message requests to an outbox.
#[derive(Parser, Debug)]
#[command(name = "nudge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to nudge.toml (defaults to ./nudge.toml)
    #[arg(long, global = true, env = "NUDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the outbox (`-` for stdout)
    #[arg(long, global = true, env = "NUDGE_OUTBOX")]
    pub outbox: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log debug events to stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one poll cycle over every open task
    Cycle,

    /// Run one escalation cycle over overdue tasks
    Escalate,

    /// Poll and escalate on the configured schedule until interrupted
    Watch {
        /// Override the poll interval, in seconds
        #[arg(long)]
        poll_secs: Option<u64>,

        /// Override the escalation interval, in seconds
        #[arg(long)]
        escalate_secs: Option<u64>,
    },

    /// List tasks by priority score
    Rank {
        /// Include done tasks
        #[arg(long)]
        all: bool,

        /// Show at most this many tasks
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Process one webhook delivery
    Webhook {
        /// Sender: github or clickup
        source: String,

        /// Event type (GitHub `X-GitHub-Event`, ClickUp `event`)
        event: String,

        /// File holding the raw request body
        payload: PathBuf,

        /// Signature header value
        #[arg(long)]
        signature: Option<String>,
    },

    /// Show effective settings and notification policy
    Config,
}

impl Commands {
    /// Whether the command hands message requests to the outbox
    fn writes_outbox(&self) -> bool {
        matches!(
            self,
            Commands::Cycle | Commands::Escalate | Commands::Watch { .. } | Commands::Webhook { .. }
        )
    }
}

/// Settings resolved for one invocation
#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub settings: Settings,
    pub settings_path: PathBuf,
    pub output: OutputOptions,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self> {
        let settings_path = cli.settings_path()?;
        let mut settings = if settings_path.exists() {
            Settings::load(&settings_path)?
        } else if cli.config.is_some() {
            return Err(Error::InvalidArgument(format!(
                "config file not found: {}",
                settings_path.display()
            )));
        } else {
            Settings::default()
        };
        if let Some(outbox) = &cli.outbox {
            settings.outbox = outbox.clone();
        }
        // Message requests own stdout; the envelope stays out of their way.
        let shares_stdout = cli.command.writes_outbox() && is_stdout(&settings.outbox);
        let root = settings_root(&settings_path);
        Ok(Self {
            settings: settings.rebase(&root),
            settings_path,
            output: OutputOptions {
                json: cli.json && !shares_stdout,
                quiet: cli.quiet || shares_stdout,
            },
        })
    }

    pub fn store(&self) -> JsonFileStore {
        JsonFileStore::new(&self.settings.store)
    }

    pub fn policy(&self) -> ConfigHandle {
        ConfigHandle::from_path(&self.settings.notifications)
    }

    pub fn engine(&self) -> Result<Engine<JsonFileStore, GatedNotifier<JsonlNotifier>>> {
        let destination = OutboxDestination::parse(&self.settings.outbox)
            .ok_or_else(|| Error::InvalidConfig("outbox cannot be empty".to_string()))?;
        let quiet_hours = self
            .settings
            .quiet_hours
            .as_ref()
            .map(QuietHours::from_config)
            .transpose()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let notifier = GatedNotifier::new(destination.open()?, quiet_hours, Arc::clone(&clock));

        Ok(Engine::new(
            Arc::new(self.store()),
            Arc::new(notifier),
            self.policy(),
            self.settings.identity.clone(),
        )
        .with_clock(clock)
        .with_webhooks(self.settings.webhooks.clone())
        .with_max_parallel(self.settings.max_parallel))
    }
}

fn is_stdout(outbox: &str) -> bool {
    matches!(OutboxDestination::parse(outbox), Some(OutboxDestination::Stdout))
}

fn settings_root(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
}

impl Cli {
    fn settings_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_dir()?.join(CONFIG_FILE)),
        }
    }

    /// Whether this command writes message requests to stdout, which rules
    /// out a JSON envelope there
    pub fn outbox_is_stdout(&self) -> bool {
        if !self.command.writes_outbox() {
            return false;
        }
        let outbox = match (&self.outbox, self.settings_path()) {
            (Some(outbox), _) => outbox.clone(),
            (None, Ok(path)) => Settings::load_or_default(&path).outbox,
            (None, Err(_)) => return false,
        };
        is_stdout(&outbox)
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let ctx = Context::load(&self)?;
        match self.command {
            Commands::Cycle => runtime()?.block_on(cycle::run_poll(&ctx)),
            Commands::Escalate => runtime()?.block_on(cycle::run_escalate(&ctx)),
            Commands::Watch {
                poll_secs,
                escalate_secs,
            } => runtime()?.block_on(cycle::run_watch(
                &ctx,
                cycle::WatchOptions {
                    poll_secs,
                    escalate_secs,
                },
            )),
            Commands::Rank { all, limit } => {
                runtime()?.block_on(rank::run(&ctx, rank::RankOptions { all, limit }))
            }
            Commands::Webhook {
                source,
                event,
                payload,
                signature,
            } => runtime()?.block_on(webhook::run(
                &ctx,
                webhook::WebhookOptions {
                    source,
                    event,
                    payload,
                    signature,
                },
            )),
            Commands::Config => config::run(&ctx),
        }
    }
}
