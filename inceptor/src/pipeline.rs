//! Orchestration of a full `inception` run across levels.
//!
//! Level 1 runs once on the problem statement. Every later level fans out over
//! the tasks the previous level emitted, one stage invocation per task. Stage
//! failures are recorded in the solution metadata; only caller-input and
//! template errors abort the run.

use std::collections::BTreeMap;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::core::context::{ContextOverrides, extract_context};
use crate::core::level::Level;
use crate::core::task::TaskCollector;
use crate::core::types::{FallbackEntry, LevelResults, Solution, StageFailure, StageResult};
use crate::error::{BackendError, PipelineError, StageError};
use crate::io::backend::{Backend, GenerateOptions, build_backend};
use crate::io::config::{ErrorPolicy, InceptorConfig, PipelineConfig};
use crate::io::prompt::{PromptBuilder, TemplateRegistry};
use crate::stage::{StageExecutor, StageJob, root_fields, task_fields};

type Outcome = Option<Result<StageResult, StageError>>;

/// Reject depths outside `[Level::MIN_DEPTH, Level::MAX_DEPTH]`.
pub fn validate_depth(max_levels: u8) -> Result<(), PipelineError> {
    if (Level::MIN_DEPTH..=Level::MAX_DEPTH).contains(&max_levels) {
        Ok(())
    } else {
        Err(PipelineError::InvalidDepth {
            requested: max_levels,
            min: Level::MIN_DEPTH,
            max: Level::MAX_DEPTH,
        })
    }
}

/// The staged solution generator.
pub struct Inceptor<B> {
    backend: B,
    templates: TemplateRegistry,
    generation: GenerateOptions,
    pipeline: PipelineConfig,
}

impl Inceptor<Box<dyn Backend>> {
    /// Build the backend described by `config` and adopt its generation and
    /// pipeline settings.
    pub fn from_config(config: &InceptorConfig) -> Result<Self, BackendError> {
        let backend = build_backend(&config.backend)?;
        Ok(Inceptor::new(backend)
            .with_generation(config.generation.clone())
            .with_pipeline(config.pipeline.clone()))
    }
}

impl<B: Backend> Inceptor<B> {
    /// Generator with built-in templates and default settings.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            templates: TemplateRegistry::builtin(),
            generation: GenerateOptions::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_generation(mut self, generation: GenerateOptions) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    /// Generate a layered solution for `problem`, running levels `1..=max_levels`.
    ///
    /// Returns `Err` only for an out-of-range depth or a broken template, in
    /// both cases before any backend call. Everything else, including a failed
    /// level-1 stage, yields a (possibly partial) [`Solution`].
    #[instrument(skip_all, fields(max_levels = max_levels, problem_len = problem.len()))]
    pub fn inception(
        &self,
        problem: &str,
        max_levels: u8,
        extra_context: Option<&ContextOverrides>,
    ) -> Result<Solution, PipelineError> {
        validate_depth(max_levels)?;
        let prompts = PromptBuilder::new(&self.templates)?;

        let overrides = extra_context.cloned().unwrap_or_default();
        let context = extract_context(problem).enrich(&overrides);
        let mut solution = Solution::new(problem, context.clone(), max_levels);
        let executor = StageExecutor::new(&self.backend, &self.generation, self.pipeline.fallback);

        let root_job = StageJob {
            level: Level::MetaArchitecture,
            task_id: None,
            prompt: prompts.build(Level::MetaArchitecture, &root_fields(problem, &context))?,
        };
        info!(level = %Level::MetaArchitecture, "running stage");
        let root = match executor.run(&root_job) {
            Ok(result) => result,
            Err(err) => {
                warn!(err = %err, "meta-architecture stage failed");
                record_failure(&mut solution, Level::MetaArchitecture, None, &err);
                if max_levels > Level::MIN_DEPTH || self.aborts_on_error() {
                    solution.metadata.error =
                        Some(format!("{} failed: {err}", Level::MetaArchitecture));
                }
                return Ok(solution);
            }
        };
        record_fallback(&mut solution, Level::MetaArchitecture, None, &root);

        let mut collector = Level::MetaArchitecture.next().map(TaskCollector::new);
        if let Some(collector) = collector.as_mut() {
            collector.collect(Level::MetaArchitecture, None, root.record());
        }
        let root_record = root.record().clone();
        solution
            .levels
            .insert(Level::MetaArchitecture, LevelResults::Single(root));

        let mut previous: BTreeMap<String, StageResult> = BTreeMap::new();
        for level in Level::up_to(max_levels).skip(1) {
            let Some(done) = collector.take() else {
                break;
            };
            let (tasks, rejected) = done.finish();
            let rejected_any = !rejected.is_empty();
            solution.metadata.failures.extend(rejected);
            if rejected_any && self.aborts_on_error() {
                solution.metadata.error =
                    Some(format!("duplicate task ids emitted for {level}"));
                return Ok(solution);
            }

            let jobs = tasks
                .iter()
                .map(|task| {
                    let parent = match task.parent.as_deref() {
                        Some(id) => previous.get(id).map(StageResult::record),
                        None => Some(&root_record),
                    };
                    let fields = task_fields(task, &context, Some(&root_record), parent);
                    Ok(StageJob {
                        level,
                        task_id: Some(task.id.clone()),
                        prompt: prompts.build(level, &fields)?,
                    })
                })
                .collect::<Result<Vec<_>, PipelineError>>()?;

            info!(level = %level, tasks = jobs.len(), "running stage fan-out");
            let outcomes = self.fan_out(&executor, &jobs);
            solution.tasks.extend(tasks.iter().cloned());

            let mut results = BTreeMap::new();
            let mut failed = false;
            for (task, outcome) in tasks.iter().zip(outcomes) {
                match outcome {
                    Some(Ok(result)) => {
                        record_fallback(&mut solution, level, Some(task.id.as_str()), &result);
                        results.insert(task.id.clone(), result);
                    }
                    Some(Err(err)) => {
                        warn!(level = %level, task_id = %task.id, err = %err, "stage failed");
                        record_failure(&mut solution, level, Some(task.id.as_str()), &err);
                        failed = true;
                    }
                    None => debug!(level = %level, task_id = %task.id, "stage skipped after abort"),
                }
            }

            collector = level.next().map(TaskCollector::new);
            if let Some(collector) = collector.as_mut() {
                for task in &tasks {
                    if let Some(result) = results.get(&task.id) {
                        collector.collect(level, Some(task.id.as_str()), result.record());
                    }
                }
            }
            solution
                .levels
                .insert(level, LevelResults::PerTask(results.clone()));
            previous = results;

            if failed && self.aborts_on_error() {
                solution.metadata.error = Some(format!("aborted after failure in {level}"));
                return Ok(solution);
            }
        }

        info!(
            reached = ?solution.reached(),
            failures = solution.metadata.failures.len(),
            fallbacks = solution.metadata.fallbacks.len(),
            "inception finished"
        );
        Ok(solution)
    }

    fn aborts_on_error(&self) -> bool {
        self.pipeline.on_error == ErrorPolicy::Abort
    }

    /// Run `jobs` on up to `pipeline.parallelism` scoped workers.
    ///
    /// Outcomes come back in job order. Under [`ErrorPolicy::Abort`] workers
    /// stop taking jobs after the first failure; jobs never started are `None`.
    fn fan_out(&self, executor: &StageExecutor<'_, B>, jobs: &[StageJob]) -> Vec<Outcome> {
        let workers = self.pipeline.parallelism.clamp(1, jobs.len().max(1));
        let abort = self.aborts_on_error();
        let cursor = AtomicUsize::new(0);
        let halted = AtomicBool::new(false);

        let work = || {
            let mut done = Vec::new();
            while !halted.load(Ordering::SeqCst) {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(job) = jobs.get(index) else {
                    break;
                };
                let outcome = executor.run(job);
                if abort && outcome.is_err() {
                    halted.store(true, Ordering::SeqCst);
                }
                done.push((index, outcome));
            }
            done
        };

        let finished: Vec<(usize, Result<StageResult, StageError>)> = if workers == 1 {
            work()
        } else {
            debug!(workers, jobs = jobs.len(), "spawning stage workers");
            thread::scope(|scope| {
                let handles: Vec<_> = (0..workers).map(|_| scope.spawn(&work)).collect();
                handles
                    .into_iter()
                    .flat_map(|handle| match handle.join() {
                        Ok(done) => done,
                        Err(payload) => panic::resume_unwind(payload),
                    })
                    .collect()
            })
        };

        let mut outcomes: Vec<Outcome> = jobs.iter().map(|_| None).collect();
        for (index, outcome) in finished {
            outcomes[index] = Some(outcome);
        }
        outcomes
    }
}

fn record_failure(solution: &mut Solution, level: Level, task_id: Option<&str>, err: &StageError) {
    solution.metadata.failures.push(StageFailure {
        level,
        task_id: task_id.map(str::to_string),
        kind: err.kind(),
        message: err.to_string(),
    });
}

fn record_fallback(
    solution: &mut Solution,
    level: Level,
    task_id: Option<&str>,
    result: &StageResult,
) {
    if let StageResult::Fallback { error, .. } = result {
        solution.metadata.fallbacks.push(FallbackEntry {
            level,
            task_id: task_id.map(str::to_string),
            error: error.clone(),
        });
    }
}

/// One-call generation against the default configuration (local Ollama).
pub fn quick_solution(problem: &str, levels: u8) -> anyhow::Result<Solution> {
    let inceptor =
        Inceptor::from_config(&InceptorConfig::default()).context("build default backend")?;
    inceptor
        .inception(problem, levels, None)
        .with_context(|| format!("inception with {levels} levels"))
}
