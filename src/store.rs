//! Task persistence
//!
//! The engine only needs read access to task lists plus a single-task
//! read-modify-write. [`JsonFileStore`] keeps every task in one JSON document
//! guarded by a sidecar lock so concurrent `nudge` processes (a `watch` loop
//! and an ad hoc `webhook` call, say) serialize their writes.
//!
//! ```text
//! tasks.json        # {"schema_version": "nudge.tasks.v1", "tasks": [...]}
//! tasks.json.lock   # advisory lock, held for the duration of one update
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::task::Task;

pub const TASKS_SCHEMA_VERSION: &str = "nudge.tasks.v1";

/// Storage seam between the engine and the sync layer's task records.
///
/// `update` is the atomic unit: the closure sees the latest stored task and
/// its changes are persisted before any other update of the same store runs.
pub trait TaskStore: Send + Sync + 'static {
    fn list(&self) -> Result<Vec<Task>>;

    fn get(&self, id: &str) -> Result<Option<Task>>;

    /// Mutate one task in place. Fails with `TaskNotFound` if absent.
    fn update<R, F>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Task) -> R;

    /// Insert or replace a task
    fn upsert(&self, task: Task) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskFile {
    schema_version: String,
    #[serde(default)]
    tasks: Vec<Task>,
}

impl Default for TaskFile {
    fn default() -> Self {
        Self {
            schema_version: TASKS_SCHEMA_VERSION.to_string(),
            tasks: Vec::new(),
        }
    }
}

/// All tasks in one JSON file, replaced atomically under a file lock
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    timeout_ms: u64,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<TaskFile> {
        if !self.path.exists() {
            return Ok(TaskFile::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(TaskFile::default());
        }
        let file: TaskFile = serde_json::from_str(&content)?;
        if file.schema_version != TASKS_SCHEMA_VERSION {
            return Err(Error::OperationFailed(format!(
                "{}: unsupported schema_version '{}' (expected {})",
                self.path.display(),
                file.schema_version,
                TASKS_SCHEMA_VERSION
            )));
        }
        Ok(file)
    }

    fn write_file(&self, file: &TaskFile) -> Result<()> {
        let json = serde_json::to_string_pretty(file)?;
        lock::write_atomic(&self.path, json.as_bytes())
    }

    fn modify<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TaskFile) -> Result<T>,
    {
        let _lock = FileLock::acquire(lock::lock_path_for(&self.path), self.timeout_ms)?;
        let mut file = self.read_file()?;
        let result = f(&mut file)?;
        self.write_file(&file)?;
        Ok(result)
    }

    fn read_locked(&self) -> Result<TaskFile> {
        let _lock = FileLock::acquire(lock::lock_path_for(&self.path), self.timeout_ms)?;
        self.read_file()
    }
}

impl TaskStore for JsonFileStore {
    fn list(&self) -> Result<Vec<Task>> {
        Ok(self.read_locked()?.tasks)
    }

    fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.read_locked()?.tasks.into_iter().find(|task| task.id == id))
    }

    fn update<R, F>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Task) -> R,
    {
        self.modify(|file| {
            let task = file
                .tasks
                .iter_mut()
                .find(|task| task.id == id)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            Ok(f(task))
        })
    }

    fn upsert(&self, task: Task) -> Result<()> {
        self.modify(|file| {
            match file.tasks.iter_mut().find(|existing| existing.id == task.id) {
                Some(existing) => *existing = task,
                None => file.tasks.push(task),
            }
            Ok(())
        })
    }
}

/// In-process store for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: Mutex<BTreeMap<String, Task>>,
}

impl MemoryStore {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: Mutex::new(
                tasks
                    .into_iter()
                    .map(|task| (task.id.clone(), task))
                    .collect(),
            ),
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Task>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TaskStore for MemoryStore {
    fn list(&self) -> Result<Vec<Task>> {
        Ok(self.tasks().values().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks().get(id).cloned())
    }

    fn update<R, F>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Task) -> R,
    {
        let mut tasks = self.tasks();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        Ok(f(task))
    }

    fn upsert(&self, task: Task) -> Result<()> {
        self.tasks().insert(task.id.clone(), task);
        Ok(())
    }
}
