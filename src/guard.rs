//! In-flight dedupe-key reservations.
//!
//! A key is reserved between the filter decision and the commit after send.
//! While reserved, every other worker in the process treats it as already
//! notified, so a webhook racing a poll cycle cannot send the same event
//! twice. Reservations are released on drop whether or not the commit
//! happened; an uncommitted event is simply detected again later.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

type Reserved = HashMap<String, HashSet<String>>;

#[derive(Debug, Clone, Default)]
pub struct TaskGuards {
    reserved: Arc<Mutex<Reserved>>,
}

impl TaskGuards {
    pub fn new() -> Self {
        Self::default()
    }

    fn reserved(&self) -> MutexGuard<'_, Reserved> {
        match self.reserved.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of keys currently reserved for `task_id`.
    pub fn in_flight(&self, task_id: &str) -> usize {
        self.reserved().get(task_id).map(HashSet::len).unwrap_or(0)
    }

    /// Start an empty reservation for `task_id`.
    pub fn reservation(&self, task_id: &str) -> Reservation {
        Reservation {
            guards: self.clone(),
            task_id: task_id.to_string(),
            keys: Vec::new(),
        }
    }

    fn release(&self, task_id: &str, keys: &[String]) {
        let mut reserved = self.reserved();
        if let Some(held) = reserved.get_mut(task_id) {
            for key in keys {
                held.remove(key);
            }
            if held.is_empty() {
                reserved.remove(task_id);
            }
        }
    }
}

/// Keys held for one task; released when dropped.
#[derive(Debug)]
pub struct Reservation {
    guards: TaskGuards,
    task_id: String,
    keys: Vec<String>,
}

impl Reservation {
    /// Claim `key`. Returns false if another worker already holds it.
    pub fn claim(&mut self, key: &str) -> bool {
        let mut reserved = self.guards.reserved();
        let held = reserved.entry(self.task_id.clone()).or_default();
        if !held.insert(key.to_string()) {
            return false;
        }
        drop(reserved);
        self.keys.push(key.to_string());
        true
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.keys.is_empty() {
            self.guards.release(&self.task_id, &self.keys);
        }
    }
}
