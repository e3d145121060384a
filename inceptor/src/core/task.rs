//! Turning a level's emitted task list into next-level [`Task`]s.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::warn;

use crate::core::level::Level;
use crate::core::types::{FailureKind, Record, StageFailure, Task};

/// Collects the tasks one level will consume, enforcing unique ids.
///
/// A level may gather tasks from several upstream results (one per upstream
/// task). Ids must be unique across all of them: a repeated id is rejected and
/// reported as a [`FailureKind::DuplicateTaskId`] failure instead of silently
/// replacing the earlier task.
#[derive(Debug)]
pub struct TaskCollector {
    level: Level,
    seen: BTreeSet<String>,
    seq: usize,
    tasks: Vec<Task>,
    rejected: Vec<StageFailure>,
}

impl TaskCollector {
    /// Collector for tasks consumed by `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            seen: BTreeSet::new(),
            seq: 0,
            tasks: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Gather tasks from `producer`'s record.
    ///
    /// A missing or non-array task field contributes nothing.
    pub fn collect(&mut self, producer: Level, parent: Option<&str>, record: &Record) {
        let Some(field) = producer.task_field() else {
            return;
        };
        let Some(items) = record.get(field).and_then(Value::as_array) else {
            return;
        };
        for item in items {
            if item.is_null() {
                continue;
            }
            self.seq += 1;
            let task = self.task_from_item(item, parent);
            if !self.seen.insert(task.id.clone()) {
                warn!(level = %self.level, task_id = %task.id, "duplicate task id rejected");
                self.rejected.push(StageFailure {
                    level: self.level,
                    task_id: Some(task.id.clone()),
                    kind: FailureKind::DuplicateTaskId,
                    message: match parent {
                        Some(parent) => {
                            format!("task id `{}` repeated in output of `{parent}`", task.id)
                        }
                        None => format!("task id `{}` repeated in {}", task.id, producer.name()),
                    },
                });
                continue;
            }
            self.tasks.push(task);
        }
    }

    /// Accepted tasks in emission order, and rejected duplicates.
    pub fn finish(self) -> (Vec<Task>, Vec<StageFailure>) {
        (self.tasks, self.rejected)
    }

    fn task_from_item(&self, item: &Value, parent: Option<&str>) -> Task {
        let synthesized = || format!("{}-{}", self.level.key(), self.seq);
        let (id, description, dependencies) = match item {
            Value::Object(map) => {
                let id = ["task_id", "id"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(id_text))
                    .unwrap_or_else(synthesized);
                let description = map
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let dependencies = ["dependencies", "depends_on"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_array))
                    .map(|deps| {
                        deps.iter().filter_map(id_text).collect()
                    })
                    .unwrap_or_default();
                (id, description, dependencies)
            }
            Value::String(text) => (synthesized(), text.clone(), Vec::new()),
            other => (synthesized(), other.to_string(), Vec::new()),
        };
        Task {
            id,
            level: self.level,
            description,
            payload: item.clone(),
            dependencies,
            parent: parent.map(str::to_string),
        }
    }
}

/// Task ids and dependency references may be strings or bare numbers.
fn id_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
