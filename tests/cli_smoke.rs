use std::path::Path;

use assert_cmd::Command;
use chrono::{Duration, Local};
use predicates::str::contains;
use serde_json::{json, Value};
use tempfile::TempDir;

fn nudge(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("nudge").expect("binary");
    cmd.current_dir(dir).env_remove("NUDGE_CONFIG").env_remove("NUDGE_OUTBOX");
    cmd
}

fn write_workspace(dir: &Path) {
    std::fs::write(
        dir.join("nudge.toml"),
        "store = \"tasks.json\"\noutbox = \"out/outbox.jsonl\"\nnotifications = \"notifications.yaml\"\n",
    )
    .unwrap();
    std::fs::write(dir.join("notifications.yaml"), "mode: focus\nthreshold: 500\n").unwrap();

    let overdue = (Local::now().date_naive() - Duration::days(5)).to_string();
    let tasks = json!({
        "schema_version": "nudge.tasks.v1",
        "tasks": [
            {
                "id": "clickup:1",
                "title": "Send contract",
                "status": "todo",
                "assignee": "ivan",
                "due_date": overdue,
                "is_revenue": true,
                "notification_state": { "prev_status": "todo", "prev_assignee": "ivan" }
            },
            { "id": "github:2", "title": "Docs", "status": "done" }
        ]
    });
    std::fs::write(dir.join("tasks.json"), tasks.to_string()).unwrap();
}

fn json_output(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("json envelope")
}

#[test]
fn nudge_help_works() {
    Command::cargo_bin("nudge")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("notification"));
}

#[test]
fn subcommand_help_works() {
    for cmd in ["cycle", "escalate", "watch", "rank", "webhook", "config"] {
        Command::cargo_bin("nudge")
            .expect("binary")
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn rank_orders_open_tasks() {
    let dir = TempDir::new().unwrap();
    write_workspace(dir.path());

    let value = json_output(nudge(dir.path()).args(["--json", "rank"]));
    assert_eq!(value["schema_version"], "nudge.v1");
    assert_eq!(value["command"], "rank");
    assert_eq!(value["data"]["total"], 1);
    assert_eq!(value["data"]["tasks"][0]["id"], "clickup:1");
    assert_eq!(value["data"]["tasks"][0]["score"]["total"], 1500);
    assert_eq!(value["data"]["tasks"][0]["score"]["urgency_label"], "Overdue");

    let all = json_output(nudge(dir.path()).args(["--json", "rank", "--all"]));
    assert_eq!(all["data"]["total"], 2);
}

#[test]
fn cycle_writes_outbox_once() {
    let dir = TempDir::new().unwrap();
    write_workspace(dir.path());

    let first = json_output(nudge(dir.path()).args(["--json", "cycle"]));
    assert_eq!(first["status"], "success");
    assert_eq!(first["data"]["sent"], 1);

    let second = json_output(nudge(dir.path()).args(["--json", "cycle"]));
    assert_eq!(second["data"]["sent"], 0);

    let outbox = std::fs::read_to_string(dir.path().join("out/outbox.jsonl")).unwrap();
    assert_eq!(outbox.lines().count(), 1);
    assert!(outbox.contains("\"trigger\":\"overdue\""));
}

#[test]
fn stdout_outbox_keeps_envelope_off_stdout() {
    let dir = TempDir::new().unwrap();
    write_workspace(dir.path());
    std::fs::write(
        dir.path().join("nudge.toml"),
        "store = \"tasks.json\"\nnotifications = \"notifications.yaml\"\n",
    )
    .unwrap();

    let output = nudge(dir.path())
        .args(["--json", "cycle"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).expect("jsonl message request"))
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["trigger"], "overdue");
    assert!(lines[0].get("command").is_none());
}

#[test]
fn verbose_logs_to_stderr() {
    let dir = TempDir::new().unwrap();
    write_workspace(dir.path());

    nudge(dir.path())
        .env_remove("RUST_LOG")
        .args(["--verbose", "cycle"])
        .assert()
        .success()
        .stderr(contains("poll cycle complete"));
}

#[test]
fn escalate_sends_individual_notice() {
    let dir = TempDir::new().unwrap();
    write_workspace(dir.path());

    let value = json_output(nudge(dir.path()).args(["--json", "escalate"]));
    assert_eq!(value["data"]["eligible"], 1);
    assert_eq!(value["data"]["notices"][0]["level"], 5);
    assert_eq!(value["data"]["notices"][0]["grouped"], false);
    assert_eq!(value["data"]["notices"][0]["delivery"], "sent");

    let outbox = std::fs::read_to_string(dir.path().join("out/outbox.jsonl")).unwrap();
    assert!(outbox.contains("\"kind\":\"escalation\""));
}

#[test]
fn webhook_rejects_bad_signature() {
    let dir = TempDir::new().unwrap();
    write_workspace(dir.path());
    let mut settings = std::fs::read_to_string(dir.path().join("nudge.toml")).unwrap();
    settings.push_str("\n[webhooks]\ngithub_secret = \"s3cret\"\n");
    std::fs::write(dir.path().join("nudge.toml"), settings).unwrap();
    std::fs::write(dir.path().join("payload.json"), r#"{"action":"closed","issue":{"number":2}}"#).unwrap();

    nudge(dir.path())
        .args(["webhook", "github", "issues", "payload.json", "--signature", "sha256=00"])
        .assert()
        .code(2)
        .stderr(contains("signature"));
}

#[test]
fn webhook_ignores_unknown_task() {
    let dir = TempDir::new().unwrap();
    write_workspace(dir.path());
    std::fs::write(dir.path().join("payload.json"), r#"{"action":"closed","issue":{"number":77}}"#).unwrap();

    let value = json_output(nudge(dir.path()).args([
        "--json",
        "webhook",
        "github",
        "issues",
        "payload.json",
    ]));
    assert_eq!(value["data"]["ignored"], "unknown task");
}

#[test]
fn config_reports_effective_policy() {
    let dir = TempDir::new().unwrap();
    write_workspace(dir.path());

    let value = json_output(nudge(dir.path()).args(["--json", "config"]));
    assert_eq!(value["data"]["settings_found"], true);
    assert_eq!(value["data"]["policy"]["mode"], "focus");
    assert_eq!(value["data"]["policy"]["threshold"], 500);
    assert_eq!(value["data"]["policy"]["triggers"]["comment_on_owned"], false);
    assert_eq!(value["data"]["settings"]["identity"]["user"], "ivan");
}

#[test]
fn invalid_settings_exit_with_user_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("nudge.toml"), "max_parallel = 0\n").unwrap();

    let output = nudge(dir.path()).args(["--json", "rank"]).assert().code(2).get_output().stdout.clone();
    let value: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["error"]["kind"], "user_error");
}
