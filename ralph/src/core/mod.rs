//! Deterministic, pure logic shared by the loop controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod state;
pub mod types;
pub mod usage;
