//! Generation backend abstraction.
//!
//! The [`Backend`] trait decouples the pipeline from the service that actually
//! produces text. [`OllamaBackend`] talks to an Ollama server over HTTP,
//! [`CommandBackend`] pipes prompts through an external program, and tests use
//! scripted backends that never touch the network.

use std::process::Command;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::BackendError;
use crate::io::config::{BackendConfig, BackendKind};
use crate::io::process::run_with_input;

const COMMAND_OUTPUT_LIMIT_BYTES: usize = 4_000_000;

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    /// System prompt sent alongside every stage prompt.
    pub system: Option<String>,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            system: None,
            max_tokens: 2000,
            temperature: 0.7,
        }
    }
}

/// A blocking text-generation capability.
///
/// Implementations must be shareable across the pipeline's worker threads.
/// The pipeline adds no timeout or retry of its own.
pub trait Backend: Send + Sync {
    fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, BackendError>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, BackendError> {
        (**self).generate(prompt, options)
    }
}

impl<B: Backend + ?Sized> Backend for &B {
    fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, BackendError> {
        (**self).generate(prompt, options)
    }
}

/// Build the backend described by `config`, wrapped for retries when configured.
pub fn build_backend(config: &BackendConfig) -> Result<Box<dyn Backend>, BackendError> {
    let inner: Box<dyn Backend> = match config.kind {
        BackendKind::Ollama => Box::new(OllamaBackend::new(config)?),
        BackendKind::Command => Box::new(CommandBackend::new(config)?),
    };
    if config.retries == 0 {
        return Ok(inner);
    }
    Ok(Box::new(RetryingBackend::new(
        inner,
        config.retries,
        Duration::from_millis(config.retry_backoff_ms),
    )))
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Backend that calls Ollama's `/api/generate` endpoint without streaming.
#[derive(Debug)]
pub struct OllamaBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", config.url.trim_end_matches('/')),
            model: config.model.clone(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Backend for OllamaBackend {
    #[instrument(skip_all, fields(model = %self.model, prompt_len = prompt.len()))]
    fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, BackendError> {
        let body = OllamaRequest {
            model: &self.model,
            prompt,
            system: options.system.as_deref(),
            stream: false,
            options: OllamaOptions {
                num_predict: options.max_tokens,
                temperature: options.temperature,
            },
        };

        debug!(endpoint = %self.endpoint, "posting generate request");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.timeout)
                } else {
                    BackendError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = status.as_u16(), "ollama returned error status");
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaResponse = response
            .json()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        debug!(response_len = parsed.response.len(), "ollama response received");
        Ok(parsed.response)
    }
}

/// Backend that runs a program with the prompt on stdin and reads the reply from stdout.
///
/// The literal `{model}` in any argument is replaced with the configured model.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| BackendError::Command("backend.command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args
                .iter()
                .map(|arg| arg.replace("{model}", &config.model))
                .collect(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: COMMAND_OUTPUT_LIMIT_BYTES,
        })
    }
}

impl Backend for CommandBackend {
    #[instrument(skip_all, fields(program = %self.program, prompt_len = prompt.len()))]
    fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, BackendError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        let output = run_with_input(
            cmd,
            prompt.as_bytes(),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|e| BackendError::Command(format!("{e:#}")))?;

        if output.timed_out {
            return Err(BackendError::Timeout(self.timeout));
        }
        if !output.status.success() {
            return Err(BackendError::Command(format!(
                "`{}` exited with status {:?}: {}",
                self.program,
                output.status.code(),
                output.stderr_tail()
            )));
        }
        // Truncated replies never reach extraction.
        if output.stdout_truncated > 0 {
            return Err(BackendError::Command(format!(
                "`{}` output exceeded {} bytes",
                self.program, self.output_limit_bytes
            )));
        }
        Ok(output.stdout_text())
    }
}

/// Retries transient failures of the wrapped backend with linear backoff.
#[derive(Debug)]
pub struct RetryingBackend<B> {
    inner: B,
    retries: u32,
    backoff: Duration,
}

impl<B: Backend> RetryingBackend<B> {
    pub fn new(inner: B, retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            retries,
            backoff,
        }
    }
}

impl<B: Backend> Backend for RetryingBackend<B> {
    fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, BackendError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.generate(prompt, options) {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    let delay = self.backoff * attempt;
                    warn!(attempt, retries = self.retries, err = %err, ?delay, "retrying backend call");
                    thread::sleep(delay);
                }
                Err(err) => {
                    if attempt > 0 {
                        info!(attempt, "backend still failing after retries");
                    }
                    return Err(err);
                }
            }
        }
    }
}
