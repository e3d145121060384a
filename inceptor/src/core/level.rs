//! The five pipeline levels and their fixed per-level contracts.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::types::Record;

/// One stage of the generation pipeline.
///
/// Levels are ordered: level `k + 1` consumes the tasks emitted by level `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    MetaArchitecture,
    SolutionDesign,
    Implementation,
    Integration,
    Optimization,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::MetaArchitecture,
        Level::SolutionDesign,
        Level::Implementation,
        Level::Integration,
        Level::Optimization,
    ];

    pub const MIN_DEPTH: u8 = 1;
    pub const MAX_DEPTH: u8 = 5;

    /// Level for a 1-based ordinal.
    pub fn from_ordinal(ordinal: u8) -> Option<Level> {
        match ordinal {
            1 => Some(Level::MetaArchitecture),
            2 => Some(Level::SolutionDesign),
            3 => Some(Level::Implementation),
            4 => Some(Level::Integration),
            5 => Some(Level::Optimization),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        match self {
            Level::MetaArchitecture => 1,
            Level::SolutionDesign => 2,
            Level::Implementation => 3,
            Level::Integration => 4,
            Level::Optimization => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::MetaArchitecture => "Meta-Architecture",
            Level::SolutionDesign => "Solution-Design",
            Level::Implementation => "Implementation",
            Level::Integration => "Integration",
            Level::Optimization => "Optimization",
        }
    }

    /// Stable snake_case key used in serialized solutions and template names.
    pub fn key(self) -> &'static str {
        match self {
            Level::MetaArchitecture => "meta_architecture",
            Level::SolutionDesign => "solution_design",
            Level::Implementation => "implementation",
            Level::Integration => "integration",
            Level::Optimization => "optimization",
        }
    }

    pub fn next(self) -> Option<Level> {
        Level::from_ordinal(self.ordinal() + 1)
    }

    /// Levels `1..=depth` in execution order.
    pub fn up_to(depth: u8) -> impl Iterator<Item = Level> {
        Level::ALL
            .into_iter()
            .take_while(move |level| level.ordinal() <= depth)
    }

    /// Record field holding the tasks this level emits for the next one.
    ///
    /// `None` for the terminal level.
    pub fn task_field(self) -> Option<&'static str> {
        match self {
            Level::MetaArchitecture => Some("design_tasks"),
            Level::SolutionDesign => Some("implementation_tasks"),
            Level::Implementation => Some("integration_tasks"),
            Level::Integration => Some("optimization_tasks"),
            Level::Optimization => None,
        }
    }

    /// Placeholders the level's prompt template is rendered with.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Level::MetaArchitecture => &["problem", "context"],
            Level::SolutionDesign => &["task", "context", "components"],
            Level::Implementation => &["task", "specification", "context"],
            Level::Integration => &["task", "context"],
            Level::Optimization => &["task", "context"],
        }
    }

    /// Hand-authored default record substituted in degraded (fallback) mode.
    ///
    /// The emitted task list is always empty so a fallback never fans out.
    pub fn synthetic_record(self) -> Record {
        let value = match self {
            Level::MetaArchitecture => json!({
                "analysis": "No analysis available; the model response could not be parsed.",
                "components": [],
                "design_tasks": [],
            }),
            Level::SolutionDesign => json!({
                "design": {
                    "architecture": "unavailable",
                    "technologies": [],
                    "interfaces": [],
                    "data_flow": "unavailable",
                },
                "implementation_tasks": [],
            }),
            Level::Implementation => json!({
                "implementation": {
                    "files": [],
                    "commands": [],
                    "documentation": "unavailable",
                },
                "integration_tasks": [],
            }),
            Level::Integration => json!({
                "deployment": {
                    "ci_cd": "unavailable",
                    "infrastructure": "unavailable",
                    "monitoring": "unavailable",
                    "logging": "unavailable",
                },
                "optimization_tasks": [],
            }),
            Level::Optimization => json!({
                "optimization": {
                    "bottlenecks": [],
                    "improvements": [],
                    "scaling_plan": "unavailable",
                    "cost_analysis": "unavailable",
                },
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => Record::new(),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.ordinal())
    }
}
