//! Side-effecting adapters: config files, prompt templates, and generation backends.

pub mod backend;
pub mod config;
pub mod process;
pub mod prompt;
