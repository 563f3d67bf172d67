//! Iterative AI coding-agent loop runner.
//!
//! Ralph repeatedly hands a plan to an external coding-agent CLI (`claude` or
//! `opencode`) running against a target folder, classifies each run by the
//! `<Improved>`/`<Completed>` markers in its output, and decides whether to go
//! again. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, usage totals,
//!   quota tiers, loop transitions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (subprocess supervision, agent
//!   command lines, prompts, config, terminal menus, interrupts).
//!
//! Orchestration modules ([`looping`], [`planning`]) coordinate core logic
//! with I/O to implement the CLI commands; [`report`] renders their results.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod planning;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
