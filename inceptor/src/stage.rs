//! One stage invocation: prompt in, structured record out.

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::context::TagSet;
use crate::core::extract::extract_record;
use crate::core::level::Level;
use crate::core::types::{Record, StageResult, Task};
use crate::error::StageError;
use crate::io::backend::{Backend, GenerateOptions};
use crate::io::config::FallbackPolicy;
use crate::io::prompt::PromptFields;

/// A fully rendered prompt waiting for the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageJob {
    pub level: Level,
    /// Consumed task; `None` for level 1.
    pub task_id: Option<String>,
    pub prompt: String,
}

/// Runs stage jobs against a backend.
///
/// Holds only shared references, so one executor serves every worker thread
/// of a level fan-out.
pub struct StageExecutor<'a, B: ?Sized> {
    backend: &'a B,
    options: &'a GenerateOptions,
    fallback: FallbackPolicy,
}

impl<'a, B: Backend + ?Sized> StageExecutor<'a, B> {
    pub fn new(backend: &'a B, options: &'a GenerateOptions, fallback: FallbackPolicy) -> Self {
        Self {
            backend,
            options,
            fallback,
        }
    }

    /// Invoke the backend and recover the record from its reply.
    ///
    /// The record is returned as extracted. Under [`FallbackPolicy::Synthetic`]
    /// an unparseable reply yields the level's default record, flagged as a
    /// fallback; backend errors are never masked.
    #[instrument(skip_all, fields(level = %job.level, task_id = job.task_id.as_deref().unwrap_or("-")))]
    pub fn run(&self, job: &StageJob) -> Result<StageResult, StageError> {
        let raw = self.backend.generate(&job.prompt, self.options)?;
        debug!(response_len = raw.len(), "backend replied");
        match extract_record(&raw) {
            Ok(record) => Ok(StageResult::Parsed { record }),
            Err(err) => match self.fallback {
                FallbackPolicy::Fail => Err(err.into()),
                FallbackPolicy::Synthetic => {
                    warn!(err = %err, "substituting synthetic record");
                    Ok(StageResult::Fallback {
                        record: job.level.synthetic_record(),
                        error: err.to_string(),
                    })
                }
            },
        }
    }
}

/// Prompt fields for the single level-1 invocation.
pub fn root_fields(problem: &str, context: &TagSet) -> PromptFields {
    PromptFields::new()
        .with("problem", problem)
        .with("context", context.to_prompt_json())
}

/// Prompt fields for one task at levels 2-5.
///
/// `root` is the level-1 record (source of `components`); `parent` is the
/// record of the stage that emitted `task` (source of the level-3
/// `specification`). Absent upstream data renders as an empty JSON value.
pub fn task_fields(
    task: &Task,
    context: &TagSet,
    root: Option<&Record>,
    parent: Option<&Record>,
) -> PromptFields {
    let fields = PromptFields::new()
        .with("task", pretty(&task.payload))
        .with("context", context.to_prompt_json());
    match task.level {
        Level::SolutionDesign => fields.with(
            "components",
            pretty(&field_or(root, "components", Value::Array(Vec::new()))),
        ),
        Level::Implementation => fields.with(
            "specification",
            pretty(&field_or(parent, "design", Value::Object(Record::new()))),
        ),
        Level::MetaArchitecture | Level::Integration | Level::Optimization => fields,
    }
}

fn field_or(record: Option<&Record>, key: &str, default: Value) -> Value {
    record
        .and_then(|record| record.get(key))
        .cloned()
        .unwrap_or(default)
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
