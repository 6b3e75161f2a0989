use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as Days, NaiveDate};
use tokio::task::JoinSet;

use nudge::clock::{Clock, FixedClock};
use nudge::config::{Identity, WebhookConfig};
use nudge::engine::Engine;
use nudge::events::{MessageBody, MessageRequest, Trigger};
use nudge::policy::{ConfigHandle, Mode, NotificationConfig};
use nudge::send::{Delivery, Notifier};
use nudge::store::{MemoryStore, TaskStore};
use nudge::task::Task;
use nudge::webhook::{self, WebhookSource};
use nudge::Error;

const USER: &str = "ivan";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
}

#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<MessageRequest>>,
    defer_all: AtomicBool,
    defer: Mutex<HashSet<Trigger>>,
    delay: Option<Duration>,
}

impl Recorder {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<MessageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn deliver(&self, request: &MessageRequest) -> nudge::Result<Delivery> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.defer_all.load(Ordering::SeqCst) {
            return Ok(Delivery::Deferred("held".to_string()));
        }
        if let MessageBody::Event { trigger, .. } = &request.body {
            if self.defer.lock().unwrap().contains(trigger) {
                return Ok(Delivery::Deferred(format!("{trigger} held")));
            }
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(Delivery::Sent)
    }
}

/// An open task owned by the user, already seen once so only new changes fire.
fn owned(id: &str, days_overdue: i64) -> Task {
    let mut task = Task::new(id, "todo");
    task.assignee = Some(USER.to_string());
    task.due_date = Some(today() - Days::days(days_overdue));
    task.notification_state.prev_status = Some("todo".to_string());
    task.notification_state.prev_assignee = Some(USER.to_string());
    task
}

fn engine(store: &Arc<MemoryStore>, notifier: &Arc<Recorder>) -> Engine<MemoryStore, Recorder> {
    Engine::new(
        Arc::clone(store),
        Arc::clone(notifier),
        ConfigHandle::fixed(NotificationConfig::default()),
        Identity::default(),
    )
    .with_clock(Arc::new(FixedClock::on(today())))
}

fn stored(store: &MemoryStore, id: &str) -> Task {
    store.get(id).unwrap().expect("task")
}

#[tokio::test]
async fn overdue_notifies_once_per_day() {
    let store = Arc::new(MemoryStore::new([owned("clickup:1", 1)]));
    let notifier = Arc::new(Recorder::default());
    let engine = engine(&store, &notifier);

    let first = engine.poll_cycle().await.unwrap();
    assert_eq!(first.sent, 1);
    assert_eq!(first.outcomes[0].task_id, "clickup:1");

    let task = stored(&store, "clickup:1");
    assert_eq!(task.notification_state.last_overdue_notified, Some(today()));
    assert!(task
        .notification_state
        .dedupe_keys
        .contains("overdue:clickup:1:overdue:2026-03-10"));
    assert!(task.last_notified_at.is_some());
    assert_eq!(task.score, 500);

    let second = engine.poll_cycle().await.unwrap();
    assert_eq!(second.detected, 0);
    assert_eq!(second.sent, 0);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn below_threshold_events_only_move_snapshot() {
    let mut task = Task::new("clickup:2", "todo");
    task.assignee = Some("tamas".to_string());
    task.notification_state.prev_assignee = Some("tamas".to_string());
    let store = Arc::new(MemoryStore::new([task]));
    let notifier = Arc::new(Recorder::default());
    let engine = engine(&store, &notifier);

    store
        .update("clickup:2", |task| task.status = "blocked".to_string())
        .unwrap();
    let report = engine.poll_cycle().await.unwrap();
    assert_eq!(report.detected, 1);
    assert_eq!(report.blocked, 1);
    assert_eq!(report.sent, 0);

    let task = stored(&store, "clickup:2");
    assert_eq!(task.notification_state.prev_status.as_deref(), Some("blocked"));
    assert!(task.notification_state.dedupe_keys.is_empty());
}

#[tokio::test]
async fn mode_off_blocks_everything() {
    let store = Arc::new(MemoryStore::new([owned("clickup:3", 2)]));
    let notifier = Arc::new(Recorder::default());
    let config = NotificationConfig {
        mode: Mode::Off,
        ..NotificationConfig::default()
    };
    let engine = Engine::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        ConfigHandle::fixed(config),
        Identity::default(),
    )
    .with_clock(Arc::new(FixedClock::on(today())));

    let report = engine.poll_cycle().await.unwrap();
    assert_eq!(report.blocked, 1);
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn deferred_delivery_is_retried() {
    let store = Arc::new(MemoryStore::new([owned("clickup:4", 1)]));
    let notifier = Arc::new(Recorder::default());
    notifier.defer_all.store(true, Ordering::SeqCst);
    let engine = engine(&store, &notifier);

    let held = engine.poll_cycle().await.unwrap();
    assert_eq!(held.deferred, 1);
    assert_eq!(held.sent, 0);
    let task = stored(&store, "clickup:4");
    assert!(task.notification_state.last_overdue_notified.is_none());
    assert!(task.notification_state.dedupe_keys.is_empty());
    assert_eq!(engine.guards().in_flight("clickup:4"), 0);

    notifier.defer_all.store(false, Ordering::SeqCst);
    let retried = engine.poll_cycle().await.unwrap();
    assert_eq!(retried.sent, 1);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn partial_delivery_keeps_pending_transition() {
    let mut task = Task::new("clickup:5", "blocked");
    task.is_revenue = true;
    task.assignee = Some(USER.to_string());
    task.notification_state.prev_status = Some("todo".to_string());
    let store = Arc::new(MemoryStore::new([task]));
    let notifier = Arc::new(Recorder::default());
    notifier.defer.lock().unwrap().insert(Trigger::Assigned);
    let engine = engine(&store, &notifier);

    let first = engine.poll_cycle().await.unwrap();
    assert_eq!(first.detected, 2);
    assert_eq!(first.sent, 1);
    assert_eq!(first.deferred, 1);
    let task = stored(&store, "clickup:5");
    assert_eq!(task.notification_state.prev_status.as_deref(), Some("todo"));
    assert!(task.notification_state.prev_assignee.is_none());

    notifier.defer.lock().unwrap().clear();
    let second = engine.poll_cycle().await.unwrap();
    assert_eq!(second.detected, 2);
    assert_eq!(second.blocked, 1);
    assert_eq!(second.sent, 1);

    let third = engine.poll_cycle().await.unwrap();
    assert_eq!(third.detected, 0);

    let triggers: Vec<String> = notifier
        .sent()
        .iter()
        .filter_map(|request| match &request.body {
            MessageBody::Event { trigger, .. } => Some(trigger.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(triggers, ["status_critical", "assigned"]);
}

#[tokio::test]
async fn concurrent_workers_send_once() {
    let mut task = owned("clickup:6", 1);
    task.is_revenue = true;
    let store = Arc::new(MemoryStore::new([task]));
    let notifier = Arc::new(Recorder::slow(Duration::from_millis(30)));
    let engine = engine(&store, &notifier);

    let mut workers = JoinSet::new();
    for _ in 0..8 {
        let engine = engine.clone();
        workers.spawn(async move { engine.process_task("clickup:6").await });
    }
    let mut sent = 0;
    while let Some(joined) = workers.join_next().await {
        sent += joined.unwrap().unwrap().sent;
    }
    assert_eq!(sent, 1);
    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(engine.guards().in_flight("clickup:6"), 0);
}

#[tokio::test]
async fn deferred_transition_survives_concurrent_worker() {
    let mut task = Task::new("clickup:7", "todo");
    task.is_revenue = true;
    task.assignee = Some(USER.to_string());
    task.notification_state.prev_status = Some("todo".to_string());
    task.notification_state.prev_assignee = Some("tamas".to_string());
    let store = Arc::new(MemoryStore::new([task]));
    let notifier = Arc::new(Recorder::slow(Duration::from_millis(300)));
    notifier.defer_all.store(true, Ordering::SeqCst);
    let engine = engine(&store, &notifier);

    let first = engine.clone();
    let first = tokio::spawn(async move { first.process_task("clickup:7").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = engine.process_task("clickup:7").await.unwrap();
    assert_eq!(second.detected, 1);
    assert_eq!(second.accepted, 0);
    assert_eq!(second.blocked, 1);
    assert_eq!(
        stored(&store, "clickup:7").notification_state.prev_assignee.as_deref(),
        Some("tamas")
    );

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.deferred, 1);
    assert_eq!(
        stored(&store, "clickup:7").notification_state.prev_assignee.as_deref(),
        Some("tamas")
    );

    notifier.defer_all.store(false, Ordering::SeqCst);
    let retried = engine.process_task("clickup:7").await.unwrap();
    assert_eq!(retried.sent, 1);
    let task = stored(&store, "clickup:7");
    assert_eq!(task.notification_state.prev_assignee.as_deref(), Some(USER));
    assert!(task.notification_state.dedupe_keys.contains("assigned:clickup:7:assignee=ivan"));
}

#[tokio::test]
async fn webhook_racing_poll_sends_once() {
    let mut task = owned("github:17", 0);
    task.due_date = None;
    task.is_revenue = true;
    task.status = "urgent".to_string();
    let store = Arc::new(MemoryStore::new([task]));
    let notifier = Arc::new(Recorder::slow(Duration::from_millis(30)));
    let engine = engine(&store, &notifier);

    // A title edit re-runs detection for the task while the poll is in flight.
    let payload = serde_json::json!({
        "action": "edited",
        "issue": { "number": 17, "title": "Renamed" },
    });
    let body = serde_json::to_vec(&payload).unwrap();

    let poller = engine.clone();
    let poll = tokio::spawn(async move { poller.poll_cycle().await });
    let hook = engine
        .handle_webhook(WebhookSource::GitHub, "issues", &body, None)
        .await
        .unwrap();
    let poll = poll.await.unwrap().unwrap();

    let hook_sent = hook.outcome.map(|outcome| outcome.sent).unwrap_or(0);
    assert_eq!(hook_sent + poll.sent, 1);
    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(stored(&store, "github:17").title, "Renamed");
}

#[tokio::test]
async fn webhook_mention_is_delivered_and_deduped() {
    let mut task = owned("github:17", 0);
    task.due_date = None;
    task.is_revenue = true;
    let store = Arc::new(MemoryStore::new([task]));
    let notifier = Arc::new(Recorder::default());
    let webhooks = WebhookConfig {
        github_secret: "s3cret".to_string(),
        clickup_secret: String::new(),
    };
    let engine = engine(&store, &notifier).with_webhooks(webhooks);

    let payload = serde_json::json!({
        "action": "created",
        "issue": { "number": 17 },
        "comment": { "id": 42, "body": "@ivanivanka please look", "user": { "login": "tamas" } },
    });
    let body = serde_json::to_vec(&payload).unwrap();
    let signature = webhook::sign(WebhookSource::GitHub, &body, "s3cret");

    let report = engine
        .handle_webhook(WebhookSource::GitHub, "issue_comment", &body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(report.task_id.as_deref(), Some("github:17"));
    assert_eq!(report.event.as_deref(), Some("mentioned:github:17:comment_id=42"));
    assert_eq!(report.outcome.as_ref().unwrap().sent, 1);

    let again = engine
        .handle_webhook(WebhookSource::GitHub, "issue_comment", &body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(again.outcome.unwrap().blocked, 1);
    assert_eq!(notifier.sent().len(), 1);

    let rejected = engine
        .handle_webhook(WebhookSource::GitHub, "issue_comment", &body, Some("sha256=00"))
        .await;
    assert!(matches!(rejected, Err(Error::BadSignature(_))));
}

#[tokio::test]
async fn webhook_status_update_and_unknown_task() {
    let store = Arc::new(MemoryStore::new([owned("github:4", 0)]));
    let notifier = Arc::new(Recorder::default());
    let engine = engine(&store, &notifier);

    let closed = serde_json::to_vec(&serde_json::json!({
        "action": "closed",
        "issue": { "number": 4 },
    }))
    .unwrap();
    let report = engine
        .handle_webhook(WebhookSource::GitHub, "issues", &closed, None)
        .await
        .unwrap();
    assert_eq!(report.update.unwrap().status.as_deref(), Some("done"));
    assert_eq!(report.outcome.unwrap().detected, 0);
    assert_eq!(stored(&store, "github:4").status, "done");

    let other = serde_json::to_vec(&serde_json::json!({
        "action": "closed",
        "issue": { "number": 99 },
    }))
    .unwrap();
    let ignored = engine
        .handle_webhook(WebhookSource::GitHub, "issues", &other, None)
        .await
        .unwrap();
    assert_eq!(ignored.ignored.as_deref(), Some("unknown task"));

    let garbage = engine
        .handle_webhook(WebhookSource::ClickUp, "taskCommentPosted", b"not json", None)
        .await
        .unwrap();
    assert_eq!(garbage.ignored.as_deref(), Some("invalid JSON"));
}

#[tokio::test]
async fn escalation_consolidates_five_tasks() {
    let tasks = (1..=5).map(|n| owned(&format!("clickup:{n}"), 4));
    let store = Arc::new(MemoryStore::new(tasks));
    let notifier = Arc::new(Recorder::default());
    let engine = engine(&store, &notifier);

    let report = engine.escalation_cycle().await.unwrap();
    assert_eq!(report.eligible, 5);
    assert_eq!(report.accepted, 5);
    assert_eq!(report.notices.len(), 1);
    assert!(report.notices[0].grouped);
    assert_eq!(report.notices[0].level, 3);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0].body {
        MessageBody::GroupedEscalation { total, tasks, more, .. } => {
            assert_eq!(*total, 5);
            assert_eq!(tasks.len(), 5);
            assert_eq!(*more, 0);
        }
        other => panic!("expected grouped escalation, got {other:?}"),
    }

    let task = stored(&store, "clickup:3");
    assert_eq!(task.escalation_level, 3);
    assert_eq!(task.notification_state.last_overdue_notified, Some(today()));
    assert!(task.last_notified_at.is_some());

    let repeat = engine.escalation_cycle().await.unwrap();
    assert_eq!(repeat.blocked, 5);
    assert!(repeat.notices.is_empty());

    // The day's overdue event is covered by the escalation notice.
    let poll = engine.poll_cycle().await.unwrap();
    assert_eq!(poll.detected, 0);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn escalation_sends_small_levels_individually() {
    let mut snoozed = owned("clickup:9", 4);
    snoozed.snooze_until = Some(FixedClock::on(today() + Days::days(2)).now());
    let mut closed = owned("clickup:8", 9);
    closed.status = "done".to_string();
    let store = Arc::new(MemoryStore::new([
        owned("clickup:1", 4),
        owned("clickup:2", 8),
        snoozed,
        closed,
        owned("clickup:7", 1),
    ]));
    let notifier = Arc::new(Recorder::default());
    let engine = engine(&store, &notifier);

    let report = engine.escalation_cycle().await.unwrap();
    assert_eq!(report.eligible, 2);
    let levels: Vec<(u8, bool)> = report
        .notices
        .iter()
        .map(|notice| (notice.level, notice.grouped))
        .collect();
    assert_eq!(levels, [(7, false), (3, false)]);
    assert_eq!(notifier.sent().len(), 2);
    assert_eq!(stored(&store, "clickup:2").escalation_level, 7);
    assert_eq!(stored(&store, "clickup:9").escalation_level, 0);
}
