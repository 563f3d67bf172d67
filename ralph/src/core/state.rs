//! Loop state and the transition rules applied after each invocation.
//!
//! The controller owns a single [`LoopState`] and mutates it only between
//! invocations. Every rule here is pure so both operating modes can be tested
//! without spawning processes.

use anyhow::{Result, bail};

use crate::core::budget::Tier;
use crate::core::types::RunStatus;
use crate::core::usage::UsageTotals;

/// Default number of consecutive errors that stops an unbounded run.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Operating mode of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `run`: finite iterations, optional human prompts, stops on first error.
    Bounded,
    /// `run-endlessly`: no prompts, ignores completion, counts errors.
    Unbounded,
}

/// Why the loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The agent declared the plan done (bounded mode only).
    Completed,
    /// No iterations remain.
    MaxIterations,
    /// The user cancelled from the menu or sent an interrupt.
    Cancelled,
    /// Unbounded mode hit the consecutive error threshold.
    ConsecutiveErrors { count: u32, last: RunStatus },
    /// Bounded mode stopped on its first process-level error.
    Failed(RunStatus),
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::MaxIterations => "max_iterations",
            StopReason::Cancelled => "cancelled",
            StopReason::ConsecutiveErrors { .. } => "consecutive_errors",
            StopReason::Failed(_) => "failed",
        }
    }
}

/// What the controller does after classifying an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Invoke again with the current plan.
    Continue,
    /// Suspend and ask the human (bounded mode only).
    AwaitUser,
    Stop(StopReason),
}

/// Mutable state owned by the iteration loop.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub mode: Mode,
    /// Plan text sent each round; replaced only between invocations.
    pub plan: String,
    /// Iterations still permitted; `None` means unbounded.
    pub remaining: Option<u32>,
    pub iterations_run: u32,
    pub consecutive_errors: u32,
    pub max_consecutive_errors: u32,
    pub auto_continue: bool,
    pub tier: Tier,
    pub usage: UsageTotals,
}

impl LoopState {
    /// State for `run`. A blank plan is a configuration error.
    pub fn bounded(plan: impl Into<String>, iterations: u32) -> Result<Self> {
        Self::new(Mode::Bounded, plan.into(), Some(iterations))
    }

    /// State for `run-endlessly`, optionally capped.
    pub fn unbounded(plan: impl Into<String>, max_iterations: Option<u32>) -> Result<Self> {
        let mut state = Self::new(Mode::Unbounded, plan.into(), max_iterations)?;
        state.auto_continue = true;
        Ok(state)
    }

    fn new(mode: Mode, plan: String, remaining: Option<u32>) -> Result<Self> {
        validate_plan(&plan)?;
        Ok(Self {
            mode,
            plan,
            remaining,
            iterations_run: 0,
            consecutive_errors: 0,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            auto_continue: false,
            tier: Tier::default(),
            usage: UsageTotals::new(),
        })
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    pub fn with_auto_continue(mut self, auto_continue: bool) -> Self {
        self.auto_continue = auto_continue;
        self
    }

    /// True when a finite budget has been used up.
    pub fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Account for one invocation that was launched.
    pub fn begin_iteration(&mut self) -> u32 {
        self.iterations_run += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        self.iterations_run
    }

    /// Apply the mode's rules to the status of the invocation just finished.
    pub fn transition(&mut self, status: RunStatus) -> Transition {
        match self.mode {
            Mode::Bounded => self.bounded_transition(status),
            Mode::Unbounded => self.unbounded_transition(status),
        }
    }

    fn bounded_transition(&mut self, status: RunStatus) -> Transition {
        match status {
            RunStatus::Completed => Transition::Stop(StopReason::Completed),
            RunStatus::Timeout | RunStatus::ProcessError => {
                Transition::Stop(StopReason::Failed(status))
            }
            RunStatus::Improved | RunStatus::MissingMarker => {
                if self.exhausted() {
                    Transition::Stop(StopReason::MaxIterations)
                } else if self.auto_continue {
                    Transition::Continue
                } else {
                    Transition::AwaitUser
                }
            }
        }
    }

    fn unbounded_transition(&mut self, status: RunStatus) -> Transition {
        if status.is_error() {
            self.consecutive_errors += 1;
            if self.consecutive_errors >= self.max_consecutive_errors {
                return Transition::Stop(StopReason::ConsecutiveErrors {
                    count: self.consecutive_errors,
                    last: status,
                });
            }
        } else {
            self.consecutive_errors = 0;
        }
        if self.exhausted() {
            Transition::Stop(StopReason::MaxIterations)
        } else {
            Transition::Continue
        }
    }

    /// Replace the plan. Blank text is rejected and leaves the plan unchanged.
    pub fn replace_plan(&mut self, plan: String) -> Result<()> {
        validate_plan(&plan)?;
        self.plan = plan;
        Ok(())
    }
}

/// Reject empty or whitespace-only plans.
pub fn validate_plan(plan: &str) -> Result<()> {
    if plan.trim().is_empty() {
        bail!("plan must not be empty");
    }
    Ok(())
}
