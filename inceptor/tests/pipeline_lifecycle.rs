//! End-to-end pipeline tests against scripted backends.
//!
//! Every test drives `Inceptor::inception` through real prompt rendering and
//! response extraction; only the backend is scripted. The default script emits
//! a small task tree:
//!
//! ```text
//! level 1 → D1, D2
//! level 2: D<n> → I-D<n>
//! level 3: I-D<n> → G-I-D<n>
//! level 4: G-... → O-G-...
//! ```

use std::collections::BTreeSet;

use inceptor::core::context::{Category, ContextOverrides};
use inceptor::core::level::Level;
use inceptor::core::types::{FailureKind, LevelResults, Solution, StageResult};
use inceptor::error::{BackendError, PipelineError};
use inceptor::io::config::{ErrorPolicy, FallbackPolicy, PipelineConfig};
use inceptor::pipeline::Inceptor;
use inceptor::test_support::{
    ScriptedBackend, fenced_reply, prompt_level, prompt_task_id, stage_record,
};
use serde_json::json;

/// Reply for a prompt in the default task tree.
fn tree_reply(prompt: &str) -> String {
    let level = prompt_level(prompt).expect("prompt from a built-in template");
    let record = match level {
        Level::MetaArchitecture => stage_record(level, &["D1", "D2"]),
        _ => {
            let id = prompt_task_id(prompt).expect("task id in prompt");
            let prefix = match level {
                Level::SolutionDesign => "I",
                Level::Implementation => "G",
                _ => "O",
            };
            let next = format!("{prefix}-{id}");
            stage_record(level, &[next.as_str()])
        }
    };
    fenced_reply(&record)
}

fn tree_backend() -> ScriptedBackend {
    ScriptedBackend::new(|prompt| Ok(tree_reply(prompt)))
}

/// Tree backend whose stage for `task_id` fails with a 500.
fn failing_backend(task_id: &'static str) -> ScriptedBackend {
    ScriptedBackend::new(move |prompt| {
        if prompt_level(prompt) != Some(Level::MetaArchitecture)
            && prompt_task_id(prompt).as_deref() == Some(task_id)
        {
            return Err(BackendError::Http {
                status: 500,
                body: "model crashed".to_string(),
            });
        }
        Ok(tree_reply(prompt))
    })
}

fn per_task(solution: &Solution, level: Level) -> BTreeSet<String> {
    match solution.level(level) {
        Some(LevelResults::PerTask(map)) => map.keys().cloned().collect(),
        other => panic!("expected per-task results for {level}, got {other:?}"),
    }
}

fn ids(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn single_level_calls_backend_once() {
    let inceptor = Inceptor::new(tree_backend());
    let solution = inceptor
        .inception("Build a logging system", 1, None)
        .expect("solution");

    assert_eq!(inceptor.backend().calls(), 1);
    assert_eq!(solution.levels.len(), 1);
    let root = solution.meta_architecture().expect("level 1 result");
    assert!(!root.is_fallback());
    assert_eq!(root.record()["design_tasks"].as_array().map(Vec::len), Some(2));
    assert!(solution.tasks.is_empty());
    assert!(solution.is_complete());
}

#[test]
fn three_levels_fan_out_keyed_by_task_id() {
    let inceptor = Inceptor::new(tree_backend());
    let solution = inceptor.inception("x", 3, None).expect("solution");

    let backend = inceptor.backend();
    assert_eq!(backend.calls_for(Level::MetaArchitecture), 1);
    assert_eq!(backend.calls_for(Level::SolutionDesign), 2);
    assert_eq!(backend.calls_for(Level::Implementation), 2);
    assert_eq!(backend.calls_for(Level::Integration), 0);

    assert_eq!(per_task(&solution, Level::SolutionDesign), ids(&["D1", "D2"]));
    assert_eq!(
        per_task(&solution, Level::Implementation),
        ids(&["I-D1", "I-D2"])
    );
    assert!(solution.level(Level::Integration).is_none());

    let scheduled: Vec<(&str, Option<&str>)> = solution
        .tasks
        .iter()
        .map(|t| (t.id.as_str(), t.parent.as_deref()))
        .collect();
    assert_eq!(
        scheduled,
        vec![
            ("D1", None),
            ("D2", None),
            ("I-D1", Some("D1")),
            ("I-D2", Some("D2")),
        ]
    );
    assert_eq!(solution.reached(), Some(Level::Implementation));
    assert!(solution.is_complete());
}

#[test]
fn full_depth_reaches_optimization() {
    let inceptor = Inceptor::new(tree_backend());
    let solution = inceptor.inception("x", 5, None).expect("solution");

    assert_eq!(inceptor.backend().calls(), 1 + 2 * 4);
    assert_eq!(
        per_task(&solution, Level::Optimization),
        ids(&["O-G-I-D1", "O-G-I-D2"])
    );
    assert!(solution.is_complete());
}

#[test]
fn failing_task_is_isolated_and_survivors_continue() {
    let inceptor = Inceptor::new(failing_backend("D2"));
    let solution = inceptor.inception("x", 3, None).expect("solution");

    assert_eq!(per_task(&solution, Level::SolutionDesign), ids(&["D1"]));
    assert_eq!(per_task(&solution, Level::Implementation), ids(&["I-D1"]));

    let failures = &solution.metadata.failures;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].level, Level::SolutionDesign);
    assert_eq!(failures[0].task_id.as_deref(), Some("D2"));
    assert_eq!(failures[0].kind, FailureKind::Backend);
    assert!(failures[0].message.contains("500"));
    assert!(solution.metadata.error.is_none());
    assert!(!solution.is_complete());
}

#[test]
fn out_of_range_depth_is_rejected_before_any_call() {
    let inceptor = Inceptor::new(tree_backend());
    for depth in [0, 6] {
        let err = inceptor.inception("x", depth, None).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidDepth { requested, min: 1, max: 5 } if requested == depth
        ));
    }
    assert_eq!(inceptor.backend().calls(), 0);
}

#[test]
fn parallel_fan_out_matches_sequential() {
    let sequential = Inceptor::new(tree_backend())
        .inception("Scale a python api to 1000 users", 5, None)
        .expect("sequential");
    let parallel = Inceptor::new(tree_backend())
        .with_pipeline(PipelineConfig {
            parallelism: 4,
            ..PipelineConfig::default()
        })
        .inception("Scale a python api to 1000 users", 5, None)
        .expect("parallel");

    assert_eq!(parallel, sequential);
    assert_eq!(
        parallel.to_json_pretty().expect("json"),
        sequential.to_json_pretty().expect("json")
    );
}

#[test]
fn abort_policy_stops_after_first_failure() {
    let inceptor = Inceptor::new(failing_backend("D1")).with_pipeline(PipelineConfig {
        on_error: ErrorPolicy::Abort,
        ..PipelineConfig::default()
    });
    let solution = inceptor.inception("x", 4, None).expect("solution");

    let backend = inceptor.backend();
    assert_eq!(backend.calls_for(Level::SolutionDesign), 1);
    assert_eq!(backend.calls_for(Level::Implementation), 0);
    assert!(per_task(&solution, Level::SolutionDesign).is_empty());
    assert!(solution.level(Level::Implementation).is_none());
    assert_eq!(solution.metadata.failures.len(), 1);
    let error = solution.metadata.error.as_deref().expect("halt reason");
    assert!(error.contains("Solution-Design"));
}

#[test]
fn unparseable_reply_fails_the_branch_by_default() {
    let backend = ScriptedBackend::new(|prompt| {
        if prompt_task_id(prompt).as_deref() == Some("D1")
            && prompt_level(prompt) == Some(Level::SolutionDesign)
        {
            return Ok("I am not sure how to design this.".to_string());
        }
        Ok(tree_reply(prompt))
    });
    let solution = Inceptor::new(backend)
        .inception("x", 2, None)
        .expect("solution");

    assert_eq!(per_task(&solution, Level::SolutionDesign), ids(&["D2"]));
    assert_eq!(solution.metadata.failures[0].kind, FailureKind::ResponseParse);
    assert!(solution.metadata.fallbacks.is_empty());
}

#[test]
fn synthetic_fallback_is_flagged_and_does_not_fan_out() {
    let backend = ScriptedBackend::new(|prompt| {
        if prompt_task_id(prompt).as_deref() == Some("D1")
            && prompt_level(prompt) == Some(Level::SolutionDesign)
        {
            return Ok("I am not sure how to design this.".to_string());
        }
        Ok(tree_reply(prompt))
    });
    let inceptor = Inceptor::new(backend).with_pipeline(PipelineConfig {
        fallback: FallbackPolicy::Synthetic,
        ..PipelineConfig::default()
    });
    let solution = inceptor.inception("x", 3, None).expect("solution");

    let level_two = solution.level(Level::SolutionDesign).expect("level 2");
    let d1 = level_two.get("D1").expect("D1 result");
    assert!(matches!(d1, StageResult::Fallback { .. }));
    assert_eq!(d1.record(), &Level::SolutionDesign.synthetic_record());
    assert!(!level_two.get("D2").expect("D2 result").is_fallback());

    assert_eq!(per_task(&solution, Level::Implementation), ids(&["I-D2"]));
    assert_eq!(solution.metadata.fallbacks.len(), 1);
    assert_eq!(solution.metadata.fallbacks[0].task_id.as_deref(), Some("D1"));
    assert!(solution.metadata.failures.is_empty());
    assert!(!solution.is_complete());

    let exported: serde_json::Value =
        serde_json::from_str(&solution.to_json_pretty().expect("json")).expect("parse");
    assert_eq!(
        exported["levels"]["solution_design"]["D1"]["source"],
        "fallback"
    );
    assert_eq!(
        exported["levels"]["solution_design"]["D2"]["source"],
        "parsed"
    );
}

#[test]
fn duplicate_task_ids_are_rejected_and_recorded() {
    let backend = ScriptedBackend::new(|prompt| {
        if prompt_level(prompt) == Some(Level::SolutionDesign) {
            return Ok(fenced_reply(&stage_record(Level::SolutionDesign, &["SHARED"])));
        }
        Ok(tree_reply(prompt))
    });
    let inceptor = Inceptor::new(backend);
    let solution = inceptor.inception("x", 3, None).expect("solution");

    assert_eq!(inceptor.backend().calls_for(Level::Implementation), 1);
    assert_eq!(per_task(&solution, Level::Implementation), ids(&["SHARED"]));
    let failures = &solution.metadata.failures;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::DuplicateTaskId);
    assert_eq!(failures[0].level, Level::Implementation);
    let shared = solution
        .tasks
        .iter()
        .find(|t| t.id == "SHARED")
        .expect("shared task");
    assert_eq!(shared.parent.as_deref(), Some("D1"));
}

#[test]
fn context_overrides_reach_metadata_and_prompts() {
    let overrides: ContextOverrides = [
        ("scale".to_string(), json!("enterprise")),
        ("team".to_string(), json!({"size": 4})),
    ]
    .into_iter()
    .collect();
    let inceptor = Inceptor::new(tree_backend());
    let solution = inceptor
        .inception("Set up monitoring for our django app", 1, Some(&overrides))
        .expect("solution");

    let context = &solution.metadata.context;
    assert!(context.contains(Category::Scale, "enterprise"));
    assert!(context.contains(Category::Urgency, "normal"));
    assert!(context.contains(Category::Technology, "django"));
    assert!(context.contains(Category::ProblemType, "monitoring"));
    assert_eq!(context.extra("team"), Some(&json!({"size": 4})));

    let prompt = &inceptor.backend().prompts()[0];
    assert!(prompt.contains("Set up monitoring for our django app"));
    assert!(prompt.contains("enterprise"));
}

#[test]
fn upstream_records_flow_into_later_prompts() {
    let inceptor = Inceptor::new(tree_backend());
    inceptor.inception("x", 3, None).expect("solution");

    let prompts = inceptor.backend().prompts();
    let design = prompts
        .iter()
        .find(|p| prompt_level(p) == Some(Level::SolutionDesign))
        .expect("level 2 prompt");
    assert!(design.contains("\"core\""), "components from level 1");

    let implementation = prompts
        .iter()
        .find(|p| prompt_level(p) == Some(Level::Implementation))
        .expect("level 3 prompt");
    assert!(
        implementation.contains("\"layered\""),
        "design from the parent level-2 record"
    );
}

#[test]
fn level_one_failure_halts_with_reason() {
    let backend = ScriptedBackend::constant("Sorry, I can't help with that.");
    let inceptor = Inceptor::new(backend);
    let solution = inceptor.inception("x", 3, None).expect("solution");

    assert_eq!(inceptor.backend().calls(), 1);
    assert!(solution.meta_architecture().is_none());
    assert_eq!(solution.metadata.failures.len(), 1);
    assert_eq!(solution.metadata.failures[0].task_id, None);
    assert!(solution.metadata.error.is_some());
    assert_eq!(solution.reached(), None);
}
