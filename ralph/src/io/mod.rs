//! I/O helpers for ralph commands.

pub mod agent;
pub mod config;
pub mod control;
pub mod executor;
pub mod plan;
pub mod process;
pub mod prompt;
pub mod signal;
