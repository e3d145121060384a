//! Staged solution-architecture generation.
//!
//! Given a free-form problem statement, the pipeline prompts a text-generation
//! backend level by level (meta-architecture, solution design, implementation,
//! integration, optimization), recovers a structured record from each reply,
//! and feeds the tasks it emits into the next level. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (levels, context tagging, record
//!   extraction, task collection, solution types). No I/O.
//! - **[`io`]**: Side-effecting adapters (config files, prompt templates,
//!   HTTP and subprocess backends).
//!
//! Orchestration modules ([`stage`], [`pipeline`]) coordinate the two.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod stage;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::core::context::{ContextOverrides, TagSet, extract_context};
pub use crate::core::level::Level;
pub use crate::core::types::{Solution, StageResult, Task};
pub use crate::error::{BackendError, PipelineError};
pub use crate::io::backend::{Backend, GenerateOptions};
pub use crate::pipeline::{Inceptor, quick_solution};
