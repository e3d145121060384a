//! Shared deterministic types for the pipeline.
//!
//! Everything here is plain data: serializable, free of handles, and safe to
//! export as JSON once a run finishes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::context::TagSet;
use crate::core::level::Level;

/// A structured record recovered from model output.
pub type Record = Map<String, Value>;

/// Outcome of one stage invocation.
///
/// `Fallback` marks a hand-authored default that stood in for output the
/// extractor could not parse, so consumers can tell it apart from real output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum StageResult {
    Parsed { record: Record },
    Fallback { record: Record, error: String },
}

impl StageResult {
    pub fn record(&self) -> &Record {
        match self {
            StageResult::Parsed { record } | StageResult::Fallback { record, .. } => record,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, StageResult::Fallback { .. })
    }
}

/// A unit of work emitted by one level and consumed by the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Level that consumes this task.
    pub level: Level,
    pub description: String,
    /// The task item exactly as the producing level emitted it.
    pub payload: Value,
    /// Declared dependencies. Informational only; tasks are never ordered by them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Id of the task whose result emitted this one (`None` for level-1 output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Results recorded for one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelResults {
    /// Level 1 runs once.
    Single(StageResult),
    /// Levels 2-5 run once per task, keyed by the consumed task id.
    PerTask(BTreeMap<String, StageResult>),
}

impl LevelResults {
    pub fn len(&self) -> usize {
        match self {
            LevelResults::Single(_) => 1,
            LevelResults::PerTask(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, task_id: &str) -> Option<&StageResult> {
        match self {
            LevelResults::Single(_) => None,
            LevelResults::PerTask(map) => map.get(task_id),
        }
    }
}

/// Why a stage branch produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Backend,
    ResponseParse,
    DuplicateTaskId,
}

/// A recorded branch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub level: Level,
    /// Task that failed; `None` for the single level-1 invocation.
    pub task_id: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

/// A stage whose output was replaced by the level's synthetic default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub level: Level,
    pub task_id: Option<String>,
    pub error: String,
}

/// Run metadata attached to a [`Solution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionMetadata {
    pub context: TagSet,
    pub max_levels: u8,
    #[serde(default)]
    pub failures: Vec<StageFailure>,
    #[serde(default)]
    pub fallbacks: Vec<FallbackEntry>,
    /// Set when the pipeline halted before reaching `max_levels`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of one `inception` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub problem: String,
    pub levels: BTreeMap<Level, LevelResults>,
    /// Every task that was scheduled, in scheduling order.
    pub tasks: Vec<Task>,
    pub metadata: SolutionMetadata,
}

impl Solution {
    pub fn new(problem: impl Into<String>, context: TagSet, max_levels: u8) -> Self {
        Self {
            problem: problem.into(),
            levels: BTreeMap::new(),
            tasks: Vec::new(),
            metadata: SolutionMetadata {
                context,
                max_levels,
                failures: Vec::new(),
                fallbacks: Vec::new(),
                error: None,
            },
        }
    }

    pub fn level(&self, level: Level) -> Option<&LevelResults> {
        self.levels.get(&level)
    }

    /// The single level-1 result, if it succeeded.
    pub fn meta_architecture(&self) -> Option<&StageResult> {
        match self.levels.get(&Level::MetaArchitecture) {
            Some(LevelResults::Single(result)) => Some(result),
            _ => None,
        }
    }

    /// True when every scheduled stage produced parsed output.
    pub fn is_complete(&self) -> bool {
        self.metadata.failures.is_empty()
            && self.metadata.fallbacks.is_empty()
            && self.metadata.error.is_none()
    }

    /// Deepest level that has at least one result.
    pub fn reached(&self) -> Option<Level> {
        self.levels
            .iter()
            .filter(|(_, results)| !results.is_empty())
            .map(|(level, _)| *level)
            .max()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}
