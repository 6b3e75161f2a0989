//! Relationship context used to weight task scores.
//!
//! The directory that loads these (YAML files per person/company) lives
//! outside the engine; hosts hand the engine a [`Directory`] value.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::score::ScoreContext;
use crate::task::Task;

/// Priority used when an entity has neither an override nor a known relationship.
pub const DEFAULT_ENTITY_PRIORITY: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkstreamStatus {
    Planned,
    Active,
    Blocked,
    Complete,
}

/// A project or initiative within an entity relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workstream {
    pub id: String,
    pub name: String,
    pub status: WorkstreamStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
}

/// A person or company the user has a relationship with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default)]
    pub workstreams: Vec<Workstream>,
}

impl Entity {
    /// Explicit priority, else the default for the relationship type.
    pub fn priority(&self) -> i64 {
        if let Some(priority) = self.priority {
            return priority;
        }
        match self.relationship_type.as_deref().map(str::trim) {
            Some("team") => 5,
            Some("client") | Some("investor") => 4,
            Some("prospect") | Some("partner") => 3,
            Some("network") | Some("vendor") => 1,
            _ => DEFAULT_ENTITY_PRIORITY,
        }
    }

    /// First active workstream, if any.
    pub fn active_workstream(&self) -> Option<&Workstream> {
        self.workstreams
            .iter()
            .find(|ws| ws.status == WorkstreamStatus::Active)
    }

    pub fn workstream(&self, id: &str) -> Option<&Workstream> {
        self.workstreams.iter().find(|ws| ws.id == id)
    }
}

/// Entities indexed by id.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    entities: HashMap<String, Entity>,
}

impl Directory {
    pub fn new(entities: impl IntoIterator<Item = Entity>) -> Self {
        Self {
            entities: entities
                .into_iter()
                .map(|entity| (entity.id.clone(), entity))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Resolve the entity and workstream a task is mapped to.
    ///
    /// A named workstream that does not exist falls back to the entity's
    /// active workstream.
    pub fn resolve(
        &self,
        entity_id: Option<&str>,
        workstream_id: Option<&str>,
    ) -> (Option<&Entity>, Option<&Workstream>) {
        let Some(entity) = entity_id.and_then(|id| self.get(id)) else {
            return (None, None);
        };
        let workstream = workstream_id
            .and_then(|id| entity.workstream(id))
            .or_else(|| entity.active_workstream());
        (Some(entity), workstream)
    }

    /// Score context for a task's entity and workstream mapping.
    pub fn context_for(&self, task: &Task) -> ScoreContext<'_> {
        let (entity, workstream) =
            self.resolve(task.entity_id.as_deref(), task.workstream_id.as_deref());
        ScoreContext { entity, workstream }
    }
}
