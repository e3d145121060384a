//! Test-only backends and canned model replies.

use std::sync::{LazyLock, Mutex, PoisonError};

use regex::Regex;
use serde_json::{Value, json};

use crate::core::level::Level;
use crate::error::BackendError;
use crate::io::backend::{Backend, GenerateOptions};

static TASK_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:task_id|id)"\s*:\s*"([^"]+)""#).expect("task id pattern should compile")
});

type Responder = dyn Fn(&str) -> Result<String, BackendError> + Send + Sync;

/// Backend that answers from a closure over the prompt and records every call.
pub struct ScriptedBackend {
    respond: Box<Responder>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(
        respond: impl Fn(&str) -> Result<String, BackendError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Backend that replies with `text` to every prompt.
    pub fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }

    /// Calls whose prompt was rendered for `level`.
    pub fn calls_for(&self, level: Level) -> usize {
        self.prompts()
            .iter()
            .filter(|prompt| prompt_level(prompt) == Some(level))
            .count()
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Backend for ScriptedBackend {
    fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, BackendError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        (self.respond)(prompt)
    }
}

/// Level a built-in template prompt was rendered for, from its opening role line.
pub fn prompt_level(prompt: &str) -> Option<Level> {
    let role = |level: Level| match level {
        Level::MetaArchitecture => "You are a Meta-Architect.",
        Level::SolutionDesign => "You are a Solution Designer.",
        Level::Implementation => "You are a Software Engineer.",
        Level::Integration => "You are a DevOps Engineer.",
        Level::Optimization => "You are a Systems Architect.",
    };
    Level::ALL
        .into_iter()
        .find(|level| prompt.starts_with(role(*level)))
}

/// First task id interpolated into a prompt (the task being worked on).
pub fn prompt_task_id(prompt: &str) -> Option<String> {
    TASK_ID_RE
        .captures(prompt)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// A record for `level` that emits one next-level task per id.
pub fn stage_record(level: Level, task_ids: &[&str]) -> Value {
    let mut record = match level {
        Level::MetaArchitecture => json!({
            "analysis": "analysis",
            "components": [{"name": "core", "priority": "high"}],
        }),
        Level::SolutionDesign => json!({"design": {"architecture": "layered"}}),
        Level::Implementation => json!({"implementation": {"files": []}}),
        Level::Integration => json!({"deployment": {"ci_cd": "pipeline"}}),
        Level::Optimization => json!({"optimization": {"improvements": []}}),
    };
    if let (Some(field), Some(map)) = (level.task_field(), record.as_object_mut()) {
        let tasks = task_ids
            .iter()
            .map(|id| json!({"task_id": id, "description": format!("{id} description")}))
            .collect();
        map.insert(field.to_string(), Value::Array(tasks));
    }
    record
}

/// `value` wrapped in prose and a labeled fence, the way chat models reply.
pub fn fenced_reply(value: &Value) -> String {
    let body = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    format!("Here is the result:\n\n```json\n{body}\n```\n\nLet me know if you need changes.")
}
