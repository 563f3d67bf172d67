//! Stable exit codes for ralph CLI commands.

/// The agent declared the plan complete, or `plan` produced an improved plan.
pub const OK: i32 = 0;
/// Configuration error, agent failure, or the consecutive-error threshold.
pub const FAILED: i32 = 1;
/// Iterations ran out or the run was cancelled.
pub const INCOMPLETE: i32 = 2;
