//! Stable exit codes for inceptor CLI commands.

/// Command succeeded; for `run`, every scheduled stage produced parsed output.
pub const OK: i32 = 0;
/// Invalid input, config, or template, or any other error before a solution exists.
pub const INVALID: i32 = 1;
/// `inceptor run` produced a solution with failures, fallbacks, or an early halt.
pub const PARTIAL: i32 = 2;
