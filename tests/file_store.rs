use std::sync::Arc;
use std::thread;

use chrono::{Duration, NaiveDate};
use nudge::clock::FixedClock;
use nudge::config::Identity;
use nudge::engine::Engine;
use nudge::policy::ConfigHandle;
use nudge::send::JsonlNotifier;
use nudge::store::{JsonFileStore, TaskStore};
use nudge::task::Task;
use tempfile::TempDir;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
}

#[test]
fn concurrent_updates_are_serialized() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("tasks.json");
    let store = Arc::new(JsonFileStore::new(&path));
    store.upsert(Task::new("clickup:1", "todo"))?;

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for round in 0..10 {
                    store
                        .update("clickup:1", |task| {
                            task.notification_state
                                .dedupe_keys
                                .record(format!("mentioned:clickup:1:comment_id={worker}-{round}"));
                            task.score += 1;
                        })
                        .expect("update");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }

    let task = store.get("clickup:1")?.expect("task");
    assert_eq!(task.score, 80);
    assert_eq!(task.notification_state.dedupe_keys.len(), 50);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    Ok(())
}

#[tokio::test]
async fn poll_cycle_persists_state_and_writes_outbox() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = Arc::new(JsonFileStore::new(dir.path().join("tasks.json")));
    let mut task = Task::new("github:3", "todo");
    task.title = "Ship invoice export".to_string();
    task.assignee = Some("ivan".to_string());
    task.due_date = Some(today() + Duration::days(1));
    task.notification_state.prev_assignee = Some("ivan".to_string());
    store.upsert(task)?;

    let outbox = dir.path().join("outbox.jsonl");
    let engine = Engine::new(
        Arc::clone(&store),
        Arc::new(JsonlNotifier::file(&outbox)?),
        ConfigHandle::from_path(dir.path().join("notifications.yaml")),
        Identity::default(),
    )
    .with_clock(Arc::new(FixedClock::on(today())));

    let report = engine.poll_cycle().await?;
    assert_eq!(report.sent, 1);
    engine.poll_cycle().await?;

    let lines: Vec<serde_json::Value> = std::fs::read_to_string(&outbox)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["kind"], "event");
    assert_eq!(lines[0]["trigger"], "deadline_warning");
    assert_eq!(lines[0]["fingerprint"], "24h");
    assert_eq!(lines[0]["context"]["urgency"], "tomorrow");
    assert_eq!(lines[0]["task"]["title"], "Ship invoice export");

    let reopened = JsonFileStore::new(store.path()).get("github:3")?.expect("task");
    assert!(reopened
        .notification_state
        .dedupe_keys
        .contains("deadline_warning:github:3:24h"));
    assert_eq!(reopened.score, 300);
    Ok(())
}
