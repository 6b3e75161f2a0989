//! Notification engine.
//!
//! Drives detection, filtering, delivery and state commits over a
//! [`TaskStore`]. Each task is handled in three phases:
//!
//! 1. Inside one store update: score, detect, filter, and reserve the dedupe
//!    keys of accepted events. Tasks with nothing accepted and nothing in
//!    flight elsewhere get `touch`ed.
//! 2. No locks held: hand message requests to the [`Notifier`].
//! 3. Inside one store update: commit the events that were delivered (or
//!    suppressed as duplicates), then release the reservations.
//!
//! An event that was deferred or failed is never committed; it is detected
//! again on the next cycle. The snapshot only moves when no transition is
//! pending, here or in another worker. Different tasks run in parallel, bounded by
//! `max_parallel`.
//!
//! Every write to notification state must go through this discipline. A
//! host that mutates `notification_state` behind the engine's back can
//! cause double sends or lost notifications; that is a consistency bug in
//! the host, not something the engine repairs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Identity, WebhookConfig};
use crate::detect::detect;
use crate::dispatch::{self, Candidate, Dispatch};
use crate::entity::Directory;
use crate::error::{Error, Result};
use crate::events::{Event, MessageRequest};
use crate::guard::{Reservation, TaskGuards};
use crate::policy::{self, ConfigHandle, NotificationConfig};
use crate::score::{self, ScoreBreakdown};
use crate::send::{Delivery, Notifier};
use crate::state::{self, Snapshot};
use crate::store::TaskStore;
use crate::task::Task;
use crate::webhook::{self, TaskUpdate, WebhookSource};

pub const DEFAULT_MAX_PARALLEL: usize = 8;

/// Result of processing one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub score: i64,
    pub detected: usize,
    pub accepted: usize,
    pub blocked: usize,
    pub sent: usize,
    pub suppressed: usize,
    pub deferred: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Totals for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub tasks: usize,
    pub detected: usize,
    pub blocked: usize,
    pub sent: usize,
    pub suppressed: usize,
    pub deferred: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Outcomes for tasks that produced at least one event
    pub outcomes: Vec<TaskOutcome>,
}

impl CycleReport {
    fn absorb(&mut self, outcome: TaskOutcome) {
        self.tasks += 1;
        self.detected += outcome.detected;
        self.blocked += outcome.blocked;
        self.sent += outcome.sent;
        self.suppressed += outcome.suppressed;
        self.deferred += outcome.deferred;
        self.failed += outcome.failed;
        self.errors.extend(outcome.errors.iter().cloned());
        if outcome.detected > 0 {
            self.outcomes.push(outcome);
        }
    }
}

/// What a webhook call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    pub source: String,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<TaskUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TaskOutcome>,
}

impl WebhookReport {
    fn new(source: WebhookSource, event_type: &str) -> Self {
        Self {
            source: source.to_string(),
            event_type: event_type.to_string(),
            task_id: None,
            update: None,
            event: None,
            ignored: None,
            outcome: None,
        }
    }

    fn ignore(mut self, reason: impl Into<String>) -> Self {
        self.ignored = Some(reason.into());
        self
    }
}

/// One escalation message and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationNotice {
    pub level: u8,
    pub grouped: bool,
    pub task_ids: Vec<String>,
    pub delivery: String,
}

/// Totals for one escalation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EscalationReport {
    /// Open, owned, unsnoozed tasks at level 3 or above
    pub eligible: usize,
    pub accepted: usize,
    pub blocked: usize,
    pub sent: usize,
    pub suppressed: usize,
    pub deferred: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub notices: Vec<EscalationNotice>,
}

/// Immutable inputs for phase-one decisions, moved into the store update.
struct Decider {
    config: Arc<NotificationConfig>,
    identity: Arc<Identity>,
    directory: Arc<Directory>,
    guards: TaskGuards,
    today: NaiveDate,
    now: DateTime<Utc>,
}

struct Screened {
    task: Task,
    score: i64,
    observed: Snapshot,
    detected: usize,
    blocked: usize,
    accepted: Vec<Event>,
    in_flight: bool,
    reservation: Reservation,
}

/// Why `admit` did or did not take an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Accepted,
    Blocked,
    InFlight,
}

enum EscalationScreen {
    Ineligible,
    Blocked,
    Accepted(Candidate, Reservation),
}

impl Decider {
    fn score(&self, task: &mut Task) -> i64 {
        let breakdown = score::score(task, self.directory.context_for(task), self.today, self.now);
        task.score = breakdown.total;
        breakdown.total
    }

    /// Filter and reserve `event` against `task`'s state.
    fn admit(&self, task: &Task, event: &Event, score: i64, reservation: &mut Reservation) -> Admission {
        let verdict = policy::evaluate(&self.config, event, score, &task.notification_state);
        if !verdict.is_allowed() {
            return Admission::Blocked;
        }
        let key = event.dedupe_key();
        if !reservation.claim(&key) {
            debug!(task = %task.id, key = %key, "event already in flight");
            return Admission::InFlight;
        }
        Admission::Accepted
    }

    fn screen(&self, task: &mut Task, update: Option<&TaskUpdate>, extra: Vec<Event>) -> Screened {
        if let Some(update) = update {
            if update.apply(task) {
                info!(task = %task.id, status = %task.status, "applied webhook update");
            }
        }
        let score = self.score(task);
        let observed = Snapshot::of(task);

        let mut events = if task.is_open() {
            detect(task, &self.identity.user, self.today)
        } else {
            Vec::new()
        };
        events.extend(extra);

        let mut reservation = self.guards.reservation(&task.id);
        let detected = events.len();
        let mut accepted = Vec::with_capacity(detected);
        let mut in_flight = false;
        for event in events {
            match self.admit(task, &event, score, &mut reservation) {
                Admission::Accepted => accepted.push(event),
                Admission::InFlight => in_flight = true,
                Admission::Blocked => {}
            }
        }

        // Another worker may still defer its event; leave the snapshot for it.
        if accepted.is_empty() && !in_flight {
            state::touch(task);
        }
        Screened {
            task: task.clone(),
            score,
            observed,
            detected,
            blocked: detected - accepted.len(),
            accepted,
            in_flight,
            reservation,
        }
    }

    fn screen_escalation(&self, task: &mut Task) -> EscalationScreen {
        let Some(level) = dispatch::eligible(task, &self.identity.user, self.today, self.now) else {
            return EscalationScreen::Ineligible;
        };
        task.escalation_level = level.value();
        let score = self.score(task);
        let candidate = Candidate::new(task.clone(), level, score, self.today);

        let mut reservation = self.guards.reservation(&task.id);
        if self.admit(task, &candidate.event, score, &mut reservation) == Admission::Accepted {
            EscalationScreen::Accepted(candidate, reservation)
        } else {
            EscalationScreen::Blocked
        }
    }
}

/// Run a store operation off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| Error::OperationFailed(format!("store worker failed: {err}")))?
}

pub struct Engine<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    policy: ConfigHandle,
    identity: Arc<Identity>,
    webhooks: Arc<WebhookConfig>,
    directory: Arc<Directory>,
    guards: TaskGuards,
    clock: Arc<dyn Clock>,
    max_parallel: usize,
}

impl<S, N> Clone for Engine<S, N> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
            policy: self.policy.clone(),
            identity: Arc::clone(&self.identity),
            webhooks: Arc::clone(&self.webhooks),
            directory: Arc::clone(&self.directory),
            guards: self.guards.clone(),
            clock: Arc::clone(&self.clock),
            max_parallel: self.max_parallel,
        }
    }
}

impl<S: TaskStore, N: Notifier> Engine<S, N> {
    pub fn new(store: Arc<S>, notifier: Arc<N>, policy: ConfigHandle, identity: Identity) -> Self {
        Self {
            store,
            notifier,
            policy,
            identity: Arc::new(identity),
            webhooks: Arc::new(WebhookConfig::default()),
            directory: Arc::new(Directory::default()),
            guards: TaskGuards::new(),
            clock: Arc::new(SystemClock),
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    pub fn with_directory(mut self, directory: Directory) -> Self {
        self.directory = Arc::new(directory);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_webhooks(mut self, webhooks: WebhookConfig) -> Self {
        self.webhooks = Arc::new(webhooks);
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &ConfigHandle {
        &self.policy
    }

    pub fn guards(&self) -> &TaskGuards {
        &self.guards
    }

    fn decider(&self) -> Decider {
        Decider {
            config: self.policy.snapshot(),
            identity: Arc::clone(&self.identity),
            directory: Arc::clone(&self.directory),
            guards: self.guards.clone(),
            today: self.clock.today(),
            now: self.clock.now(),
        }
    }

    /// Score every task in the store, highest first.
    pub async fn ranked(&self) -> Result<Vec<(Task, ScoreBreakdown)>> {
        let store = Arc::clone(&self.store);
        let tasks = blocking(move || store.list()).await?;
        let directory = Arc::clone(&self.directory);
        Ok(score::rank(
            tasks,
            |task| directory.context_for(task),
            self.clock.today(),
            self.clock.now(),
        ))
    }

    /// Detect, filter, deliver and commit for one task.
    pub async fn process_task(&self, task_id: &str) -> Result<TaskOutcome> {
        self.process(task_id, None, Vec::new()).await
    }

    async fn process(
        &self,
        task_id: &str,
        update: Option<TaskUpdate>,
        extra: Vec<Event>,
    ) -> Result<TaskOutcome> {
        let decider = self.decider();
        let (today, now) = (decider.today, decider.now);

        let store = Arc::clone(&self.store);
        let id = task_id.to_string();
        let screened = blocking(move || {
            store.update(&id, |task| decider.screen(task, update.as_ref(), extra))
        })
        .await?;

        let Screened {
            task,
            score,
            observed,
            detected,
            blocked,
            accepted,
            in_flight,
            reservation,
        } = screened;
        let mut outcome = TaskOutcome {
            task_id: task_id.to_string(),
            score,
            detected,
            accepted: accepted.len(),
            blocked,
            ..TaskOutcome::default()
        };
        if accepted.is_empty() {
            return Ok(outcome);
        }

        let mut delivered = Vec::with_capacity(accepted.len());
        let mut pending = in_flight;
        for event in accepted {
            let request = MessageRequest::for_event(&event, &task, score, now);
            match self.notifier.deliver(&request).await {
                Ok(Delivery::Sent) => {
                    outcome.sent += 1;
                    delivered.push(event);
                }
                Ok(Delivery::Suppressed(reason)) => {
                    debug!(task = %task.id, key = %event.dedupe_key(), %reason, "delivery suppressed");
                    outcome.suppressed += 1;
                    delivered.push(event);
                }
                Ok(Delivery::Deferred(reason)) => {
                    debug!(task = %task.id, key = %event.dedupe_key(), %reason, "delivery deferred");
                    outcome.deferred += 1;
                    pending = true;
                }
                Err(err) => {
                    warn!(task = %task.id, key = %event.dedupe_key(), error = %err, "delivery failed");
                    outcome.failed += 1;
                    outcome.errors.push(format!("{}: {err}", event.dedupe_key()));
                    pending = true;
                }
            }
        }

        if !delivered.is_empty() {
            let store = Arc::clone(&self.store);
            let id = task_id.to_string();
            let any_sent = outcome.sent > 0;
            blocking(move || {
                store.update(&id, |task| {
                    for event in &delivered {
                        // Keep the old snapshot while any transition is undelivered.
                        if pending {
                            state::record(task, event, today);
                        } else {
                            state::commit_observed(task, event, today, &observed);
                        }
                    }
                    if any_sent {
                        task.last_notified_at = Some(now);
                    }
                })
            })
            .await?;
        }
        drop(reservation);
        Ok(outcome)
    }

    /// One polling pass over every open task.
    pub async fn poll_cycle(&self) -> Result<CycleReport> {
        let store = Arc::clone(&self.store);
        let tasks = blocking(move || store.list()).await?;
        let ids: Vec<String> = tasks
            .into_iter()
            .filter(Task::is_open)
            .map(|task| task.id)
            .collect();
        debug!(tasks = ids.len(), "starting poll cycle");

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut join_set: JoinSet<(String, Result<TaskOutcome>)> = JoinSet::new();
        for id in ids {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = engine.process_task(&id).await;
                (id, result)
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.absorb(outcome),
                Ok((id, Err(Error::TaskNotFound(_)))) => {
                    debug!(task = %id, "task removed during cycle");
                }
                Ok((id, Err(err))) => {
                    warn!(task = %id, error = %err, "task processing failed");
                    report.tasks += 1;
                    report.errors.push(format!("{id}: {err}"));
                }
                Err(err) => {
                    warn!(error = %err, "task worker panicked");
                    report.errors.push(format!("worker: {err}"));
                }
            }
        }
        report.outcomes.sort_by(|a, b| a.task_id.cmp(&b.task_id));

        info!(
            tasks = report.tasks,
            detected = report.detected,
            sent = report.sent,
            blocked = report.blocked,
            deferred = report.deferred,
            failed = report.failed,
            "poll cycle complete"
        );
        Ok(report)
    }

    /// Verify, classify and apply a webhook delivery.
    ///
    /// A bad signature is an error. Anything else that cannot be used
    /// (invalid JSON, unclassified events, unknown tasks) is reported as
    /// ignored.
    pub async fn handle_webhook(
        &self,
        source: WebhookSource,
        event_type: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookReport> {
        let secret = self.webhooks.secret_for(source.as_str()).unwrap_or("");
        if !webhook::verify_signature(source, body, signature.unwrap_or(""), secret) {
            warn!(source = %source, event = event_type, "rejected webhook signature");
            return Err(Error::BadSignature(source.to_string()));
        }

        let mut report = WebhookReport::new(source, event_type);
        let payload: Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(source = %source, error = %err, "webhook body is not JSON");
                return Ok(report.ignore("invalid JSON"));
            }
        };

        let update = webhook::task_update(source, event_type, &payload);
        let event = webhook::parse_webhook(source, event_type, &payload, &self.identity);
        let task_id = match (&update, &event) {
            (Some(update), _) => update.task_id.clone(),
            (None, Some(event)) => event.task_id.clone(),
            (None, None) => return Ok(report.ignore("unclassified event")),
        };
        report.task_id = Some(task_id.clone());
        report.update = update.clone();
        report.event = event.as_ref().map(Event::dedupe_key);

        match self.process(&task_id, update, event.into_iter().collect()).await {
            Ok(outcome) => {
                report.outcome = Some(outcome);
                Ok(report)
            }
            Err(Error::TaskNotFound(_)) => {
                debug!(task = %task_id, "webhook for unknown task");
                Ok(report.ignore("unknown task"))
            }
            Err(err) => Err(err),
        }
    }

    /// One pass of the overdue escalation ladder.
    pub async fn escalation_cycle(&self) -> Result<EscalationReport> {
        let decider = self.decider();
        let (today, now) = (decider.today, decider.now);
        let user = self.identity.user.clone();

        let store = Arc::clone(&self.store);
        let ids: Vec<String> = blocking(move || store.list())
            .await?
            .into_iter()
            .filter(|task| dispatch::eligible(task, &user, today, now).is_some())
            .map(|task| task.id)
            .collect();

        let mut report = EscalationReport {
            eligible: ids.len(),
            ..EscalationReport::default()
        };
        if ids.is_empty() {
            return Ok(report);
        }

        let store = Arc::clone(&self.store);
        let screened = blocking(move || {
            let mut screened = Vec::with_capacity(ids.len());
            for id in ids {
                match store.update(&id, |task| decider.screen_escalation(task)) {
                    Ok(result) => screened.push(result),
                    Err(Error::TaskNotFound(_)) => continue,
                    Err(err) => return Err(err),
                }
            }
            Ok(screened)
        })
        .await?;

        let mut reservations: HashMap<String, Reservation> = HashMap::new();
        let mut candidates = Vec::new();
        for result in screened {
            match result {
                EscalationScreen::Ineligible => report.eligible -= 1,
                EscalationScreen::Blocked => report.blocked += 1,
                EscalationScreen::Accepted(candidate, reservation) => {
                    reservations.insert(candidate.task.id.clone(), reservation);
                    candidates.push(candidate);
                }
            }
        }
        report.accepted = candidates.len();

        for planned in dispatch::plan(candidates) {
            let notice = self
                .deliver_escalation(&planned, today, now, &mut report)
                .await;
            for member in planned.members() {
                reservations.remove(&member.task.id);
            }
            report.notices.push(notice);
        }

        info!(
            eligible = report.eligible,
            accepted = report.accepted,
            sent = report.sent,
            blocked = report.blocked,
            "escalation cycle complete"
        );
        Ok(report)
    }

    async fn deliver_escalation(
        &self,
        dispatch: &Dispatch,
        today: NaiveDate,
        now: DateTime<Utc>,
        report: &mut EscalationReport,
    ) -> EscalationNotice {
        let members = dispatch.members();
        let mut notice = EscalationNotice {
            level: dispatch.level().value(),
            grouped: matches!(dispatch, Dispatch::Grouped { .. }),
            task_ids: members.iter().map(|m| m.task.id.clone()).collect(),
            delivery: String::new(),
        };

        let request = dispatch.request(now);
        let delivery = match self.notifier.deliver(&request).await {
            Ok(delivery) => delivery,
            Err(err) => {
                warn!(level = notice.level, error = %err, "escalation delivery failed");
                report.failed += 1;
                report.errors.push(format!("level {}: {err}", notice.level));
                notice.delivery = "failed".to_string();
                return notice;
            }
        };
        notice.delivery = match &delivery {
            Delivery::Sent => {
                report.sent += 1;
                "sent".to_string()
            }
            Delivery::Suppressed(_) => {
                report.suppressed += 1;
                "suppressed".to_string()
            }
            Delivery::Deferred(_) => {
                report.deferred += 1;
                "deferred".to_string()
            }
        };
        if !delivery.is_final() {
            return notice;
        }

        let sent = delivery == Delivery::Sent;
        let committed: Vec<(String, Event, u8)> = members
            .iter()
            .map(|m| (m.task.id.clone(), m.event.clone(), m.level.value()))
            .collect();
        let store = Arc::clone(&self.store);
        let result = blocking(move || {
            for (id, event, level) in &committed {
                let outcome = store.update(id, |task| {
                    state::record(task, event, today);
                    task.escalation_level = *level;
                    if sent {
                        task.last_notified_at = Some(now);
                    }
                });
                match outcome {
                    Ok(()) | Err(Error::TaskNotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(())
        })
        .await;
        if let Err(err) = result {
            warn!(level = notice.level, error = %err, "escalation commit failed");
            report.errors.push(format!("commit level {}: {err}", notice.level));
        }
        notice
    }

    /// Run poll and escalation cycles on their intervals until `shutdown`
    /// resolves. The notification policy is reloaded before every poll.
    pub async fn run<F>(&self, poll_every: Duration, escalate_every: Duration, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut poll = tokio::time::interval(poll_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut escalate = tokio::time::interval(escalate_every);
        escalate.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            poll_secs = poll_every.as_secs(),
            escalate_secs = escalate_every.as_secs(),
            "engine started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("engine stopping");
                    return Ok(());
                }
                _ = poll.tick() => {
                    self.policy.reload();
                    if let Err(err) = self.poll_cycle().await {
                        warn!(error = %err, "poll cycle failed");
                    }
                }
                _ = escalate.tick() => {
                    if let Err(err) = self.escalation_cycle().await {
                        warn!(error = %err, "escalation cycle failed");
                    }
                }
            }
        }
    }
}
