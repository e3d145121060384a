//! Recovery of structured records from free-text model output.
//!
//! Models wrap JSON in prose, fences, or both. [`extract_record`] tries a
//! fixed sequence of strategies and returns the first one that yields a JSON
//! object; it never invents a record.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::Record;
use crate::error::ResponseParseError;

static LABELED_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```[ \t]*json[ \t]*\r?\n?(.*?)```").expect("labeled fence regex")
});

static ANY_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(.*?)```").expect("fence regex"));

/// Extraction strategy, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Content of a fenced block labeled `json`.
    LabeledFence,
    /// Content of the first fenced block, minus a format-name line.
    AnyFence,
    /// The whole text.
    Whole,
    /// From the first `{` to the last `}`.
    BraceSpan,
}

impl Strategy {
    pub const ORDER: [Strategy; 4] = [
        Strategy::LabeledFence,
        Strategy::AnyFence,
        Strategy::Whole,
        Strategy::BraceSpan,
    ];

    fn candidate(self, raw: &str) -> Option<&str> {
        match self {
            Strategy::LabeledFence => LABELED_FENCE_RE
                .captures(raw)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str()),
            Strategy::AnyFence => ANY_FENCE_RE
                .captures(raw)
                .and_then(|caps| caps.get(1))
                .map(|m| strip_format_line(m.as_str())),
            Strategy::Whole => Some(raw),
            Strategy::BraceSpan => {
                let start = raw.find('{')?;
                let end = raw.rfind('}')?;
                (start < end).then(|| &raw[start..=end])
            }
        }
    }
}

/// Drop a leading `json`/`JSON`-style language tag line from fenced content.
fn strip_format_line(content: &str) -> &str {
    let trimmed = content.trim_start_matches([' ', '\t']);
    match trimmed.split_once('\n') {
        Some((first, rest))
            if !first.trim().is_empty()
                && first
                    .trim()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            rest
        }
        _ => content,
    }
}

fn parse_object(candidate: &str) -> Option<Record> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Recover a record from raw model output.
///
/// Fails with [`ResponseParseError`] carrying the raw text when no strategy
/// produces a JSON object.
#[instrument(skip_all, fields(raw_len = raw.len()))]
pub fn extract_record(raw: &str) -> Result<Record, ResponseParseError> {
    for strategy in Strategy::ORDER {
        let Some(candidate) = strategy.candidate(raw) else {
            continue;
        };
        if let Some(record) = parse_object(candidate) {
            debug!(?strategy, keys = record.len(), "extracted record");
            return Ok(record);
        }
    }
    debug!("no strategy produced a json object");
    Err(ResponseParseError {
        raw: raw.to_string(),
    })
}
