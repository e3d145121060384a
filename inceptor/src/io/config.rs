//! Pipeline configuration stored in `inceptor.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::level::Level;
use crate::io::backend::GenerateOptions;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "inceptor.toml";

/// Top-level configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults that
/// target a local Ollama server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct InceptorConfig {
    pub backend: BackendConfig,
    pub generation: GenerateOptions,
    pub pipeline: PipelineConfig,
}

/// Which adapter carries prompts to the model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Ollama,
    Command,
}

/// Connection settings for the generation backend.
///
/// This is the only place the model name is configured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Base URL of the Ollama server (`kind = "ollama"`).
    pub url: String,
    pub model: String,
    /// Program and arguments (`kind = "command"`); the prompt is written to stdin.
    pub command: Vec<String>,
    /// Per-call transport timeout enforced by the adapter.
    pub timeout_secs: u64,
    /// Extra attempts for transient failures (0 disables retries).
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Ollama,
            url: "http://localhost:11434".to_string(),
            model: "mistral:7b".to_string(),
            command: Vec::new(),
            timeout_secs: 600,
            retries: 0,
            retry_backoff_ms: 1_000,
        }
    }
}

/// What to do when one task's stage fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record the failure and keep running sibling tasks and later levels.
    #[default]
    Continue,
    /// Stop scheduling work at the first failure and return what exists.
    Abort,
}

/// What to do when a response contains no parseable record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Treat it as a stage failure.
    #[default]
    Fail,
    /// Substitute the level's synthetic default record, flagged as a fallback.
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Depth used when the caller does not specify one.
    pub default_levels: u8,
    pub on_error: ErrorPolicy,
    pub fallback: FallbackPolicy,
    /// Worker threads per level fan-out (1 runs tasks sequentially).
    pub parallelism: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_levels: 3,
            on_error: ErrorPolicy::Continue,
            fallback: FallbackPolicy::Fail,
            parallelism: 1,
        }
    }
}

impl InceptorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(Level::MIN_DEPTH..=Level::MAX_DEPTH).contains(&self.pipeline.default_levels) {
            return Err(anyhow!(
                "pipeline.default_levels must be between {} and {}",
                Level::MIN_DEPTH,
                Level::MAX_DEPTH
            ));
        }
        if self.pipeline.parallelism == 0 {
            return Err(anyhow!("pipeline.parallelism must be > 0"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if self.backend.model.trim().is_empty() {
            return Err(anyhow!("backend.model must be non-empty"));
        }
        match self.backend.kind {
            BackendKind::Ollama if self.backend.url.trim().is_empty() => {
                return Err(anyhow!("backend.url must be non-empty for the ollama backend"));
            }
            BackendKind::Command
                if self
                    .backend
                    .command
                    .first()
                    .is_none_or(|program| program.trim().is_empty()) =>
            {
                return Err(anyhow!(
                    "backend.command must be a non-empty array for the command backend"
                ));
            }
            _ => {}
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(anyhow!("generation.temperature must be within 0.0..=2.0"));
        }
        if self.generation.max_tokens == 0 {
            return Err(anyhow!("generation.max_tokens must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `InceptorConfig::default()`.
pub fn load_config(path: &Path) -> Result<InceptorConfig> {
    if !path.exists() {
        let cfg = InceptorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: InceptorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &InceptorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, InceptorConfig::default());
        assert_eq!(cfg.backend.model, "mistral:7b");
        assert_eq!(cfg.pipeline.on_error, ErrorPolicy::Continue);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/inceptor.toml");
        let mut cfg = InceptorConfig::default();
        cfg.generation.system = Some("Answer in JSON only.".to_string());
        cfg.pipeline.parallelism = 4;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("inceptor.toml");
        fs::write(
            &path,
            "[backend]\nkind = \"command\"\ncommand = [\"llm\", \"-m\", \"{model}\"]\n\n[pipeline]\non_error = \"abort\"\nfallback = \"synthetic\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.backend.kind, BackendKind::Command);
        assert_eq!(cfg.backend.timeout_secs, 600);
        assert_eq!(cfg.pipeline.on_error, ErrorPolicy::Abort);
        assert_eq!(cfg.pipeline.fallback, FallbackPolicy::Synthetic);
        assert_eq!(cfg.pipeline.default_levels, 3);
        assert_eq!(cfg.generation.max_tokens, 2000);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = InceptorConfig::default();
        cfg.pipeline.default_levels = 6;
        assert!(cfg.validate().is_err());

        let mut cfg = InceptorConfig::default();
        cfg.pipeline.parallelism = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = InceptorConfig::default();
        cfg.backend.kind = BackendKind::Command;
        assert!(cfg.validate().is_err());
    }
}
