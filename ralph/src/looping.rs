//! The iteration loop behind `ralph run` and `ralph run-endlessly`.
//!
//! One controller drives both modes; the per-mode rules live in
//! [`LoopState::transition`]. Invocation, classification, accumulation and
//! human interaction happen strictly in sequence on the calling thread.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::budget::Tier;
use crate::core::classifier::{classify, fallback_summary};
use crate::core::state::{LoopState, Mode, StopReason, Transition};
use crate::core::types::{InvocationResult, RunStatus};
use crate::core::usage::{TokenUsage, UsageTotals};
use crate::exit_codes;
use crate::io::agent::{Access, AgentKind};
use crate::io::control::{ControlSurface, Decision, PromptContext, StagedEdits};
use crate::io::executor::{Executor, InvokeRequest};
use crate::io::prompt::iteration_prompt;
use crate::io::signal::CancelToken;

/// Characters of raw output shown when no marker was found.
const PREVIEW_CHARS: usize = 200;

/// Invocation settings that stay fixed for a whole run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub agent: AgentKind,
    /// Target folder, used as the agent's working directory.
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub model: Option<String>,
}

/// Progress notifications emitted by [`run_loop`].
#[derive(Debug)]
pub enum LoopEvent<'a> {
    /// An invocation is about to start.
    Started {
        iteration: u32,
        /// Permitted total for this run, if finite.
        limit: Option<u32>,
    },
    Finished(&'a IterationReport),
}

/// Summary of one finished invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub iteration: u32,
    pub status: RunStatus,
    /// Marker content, fallback summary, or the failure description.
    pub summary: String,
    /// Extra context for MISSING_MARKER results.
    pub detail: Option<String>,
    pub duration: Duration,
    pub usage: Option<TokenUsage>,
    /// Totals including this invocation.
    pub totals: UsageTotals,
    pub consecutive_errors: u32,
}

/// Summary of a loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub mode: Mode,
    pub iterations_run: u32,
    pub stop: StopReason,
    pub usage: UsageTotals,
    pub tier: Tier,
    /// Summary of the last finished invocation.
    pub last_summary: Option<String>,
}

impl LoopOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.stop {
            StopReason::Completed => exit_codes::OK,
            StopReason::MaxIterations | StopReason::Cancelled => exit_codes::INCOMPLETE,
            StopReason::ConsecutiveErrors { .. } | StopReason::Failed(_) => exit_codes::FAILED,
        }
    }
}

/// Run the loop until a stop condition is reached.
///
/// Agent failures are data: they drive transitions and never surface as `Err`.
/// `Err` is returned only for broken prompt rendering or terminal I/O.
pub fn run_loop<E: Executor, C: ControlSurface, F: FnMut(LoopEvent<'_>)>(
    executor: &E,
    control: &mut C,
    config: &LoopConfig,
    mut state: LoopState,
    cancel: &CancelToken,
    mut on_event: F,
) -> Result<LoopOutcome> {
    let mut last_summary: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Ok(finish(state, StopReason::Cancelled, last_summary));
        }
        if state.exhausted() {
            return Ok(finish(state, StopReason::MaxIterations, last_summary));
        }

        let next = state.iterations_run + 1;
        on_event(LoopEvent::Started {
            iteration: next,
            limit: state
                .remaining
                .map(|left| state.iterations_run.saturating_add(left)),
        });
        let request = InvokeRequest {
            agent: config.agent,
            prompt: iteration_prompt(&state.plan)?,
            workdir: config.workdir.clone(),
            timeout: config.timeout,
            model: config.model.clone(),
            access: Access::FullAccess,
        };
        info!(iteration = next, mode = ?state.mode, "invoking agent");
        let result = executor.invoke(&request);

        state.usage.record(result.usage.as_ref());
        let iteration = state.begin_iteration();

        if result.is_cancelled() || cancel.is_cancelled() {
            info!(iteration, "interrupted during invocation");
            return Ok(finish(state, StopReason::Cancelled, last_summary));
        }

        let classification = classify(&result);
        let transition = state.transition(classification.status);
        let report = build_report(
            iteration,
            &state,
            &result,
            classification.status,
            classification.message,
        );
        debug!(iteration, status = %report.status, ?transition, "iteration finished");
        on_event(LoopEvent::Finished(&report));
        last_summary = Some(report.summary);

        match transition {
            Transition::Continue => {}
            Transition::Stop(reason) => return Ok(finish(state, reason, last_summary)),
            Transition::AwaitUser => {
                let ctx = PromptContext {
                    iteration,
                    remaining: state.remaining.unwrap_or(0),
                    plan: &state.plan,
                };
                match control.decide(&ctx)? {
                    Decision::Continue => {}
                    Decision::AutoContinue => state.auto_continue = true,
                    Decision::Cancel => {
                        return Ok(finish(state, StopReason::Cancelled, last_summary));
                    }
                    Decision::Apply(edits) => apply_edits(&mut state, edits),
                }
            }
        }
    }
}

fn build_report(
    iteration: u32,
    state: &LoopState,
    result: &InvocationResult,
    status: RunStatus,
    message: Option<String>,
) -> IterationReport {
    let (summary, detail) = match status {
        RunStatus::Completed | RunStatus::Improved => (message.unwrap_or_default(), None),
        RunStatus::MissingMarker => {
            let preview: String = result.text.trim().chars().take(PREVIEW_CHARS).collect();
            (
                fallback_summary(&result.text),
                Some(format!(
                    "No <Completed> or <Improved> marker found. Output preview: {preview}"
                )),
            )
        }
        RunStatus::Timeout | RunStatus::ProcessError => (
            result
                .error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string()),
            None,
        ),
    };
    IterationReport {
        iteration,
        status,
        summary,
        detail,
        duration: result.duration,
        usage: result.usage.filter(|usage| !usage.is_empty()),
        totals: state.usage.clone(),
        consecutive_errors: state.consecutive_errors,
    }
}

fn apply_edits(state: &mut LoopState, edits: StagedEdits) {
    if let Some(plan) = edits.plan {
        match state.replace_plan(plan) {
            Ok(()) => info!("plan replaced"),
            Err(err) => warn!(err = %err, "ignoring plan edit"),
        }
    }
    if let Some(remaining) = edits.remaining {
        info!(remaining, "remaining iterations changed");
        state.remaining = Some(remaining);
    }
}

fn finish(state: LoopState, stop: StopReason, last_summary: Option<String>) -> LoopOutcome {
    info!(stop = stop.as_str(), iterations = state.iterations_run, "loop finished");
    LoopOutcome {
        mode: state.mode,
        iterations_run: state.iterations_run,
        stop,
        usage: state.usage,
        tier: state.tier,
        last_summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedControl, ScriptedExecutor, completed, improved, process_error, timed_out,
        unmarked, with_tokens,
    };

    fn config() -> LoopConfig {
        LoopConfig {
            agent: AgentKind::Claude,
            workdir: PathBuf::from("."),
            timeout: Duration::from_secs(300),
            model: None,
        }
    }

    fn run(
        executor: &ScriptedExecutor,
        control: &mut ScriptedControl,
        state: LoopState,
    ) -> (LoopOutcome, Vec<IterationReport>) {
        let mut reports = Vec::new();
        let outcome = run_loop(executor, control, &config(), state, &CancelToken::new(), |event| {
            if let LoopEvent::Finished(report) = event {
                reports.push(report.clone());
            }
        })
        .expect("loop");
        (outcome, reports)
    }

    #[test]
    fn auto_continue_after_first_prompt_runs_all_iterations() {
        let executor = ScriptedExecutor::new(vec![improved("step done"); 3]);
        let mut control = ScriptedControl::new(vec![Decision::AutoContinue]);
        let state = LoopState::bounded("plan", 3).expect("state");

        let (outcome, _) = run(&executor, &mut control, state);

        assert_eq!(executor.calls(), 3);
        assert_eq!(control.seen().len(), 1);
        assert_eq!(outcome.stop, StopReason::MaxIterations);
        assert_eq!(outcome.exit_code(), exit_codes::INCOMPLETE);
    }

    #[test]
    fn completion_stops_bounded_run() {
        let executor = ScriptedExecutor::new(vec![improved("one"), completed("all done")]);
        let mut control = ScriptedControl::new(vec![Decision::Continue]);
        let state = LoopState::bounded("plan", 5).expect("state");

        let (outcome, reports) = run(&executor, &mut control, state);

        assert_eq!(executor.calls(), 2);
        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(outcome.exit_code(), exit_codes::OK);
        assert_eq!(outcome.last_summary.as_deref(), Some("all done"));
        assert_eq!(reports[1].summary, "all done");
    }

    #[test]
    fn no_prompt_after_final_iteration() {
        let executor = ScriptedExecutor::new(vec![improved("a"), improved("b")]);
        let mut control = ScriptedControl::new(vec![Decision::Continue]);
        let state = LoopState::bounded("plan", 2).expect("state");

        let (outcome, _) = run(&executor, &mut control, state);

        assert_eq!(control.seen().len(), 1);
        assert_eq!(control.seen()[0].remaining, 1);
        assert_eq!(outcome.stop, StopReason::MaxIterations);
    }

    #[test]
    fn zero_iterations_never_invokes() {
        let executor = ScriptedExecutor::new(Vec::new());
        let mut control = ScriptedControl::new(Vec::new());
        let state = LoopState::bounded("plan", 0).expect("state");

        let (outcome, reports) = run(&executor, &mut control, state);

        assert_eq!(executor.calls(), 0);
        assert!(reports.is_empty());
        assert_eq!(outcome.stop, StopReason::MaxIterations);
        assert_eq!(outcome.exit_code(), exit_codes::INCOMPLETE);
    }

    #[test]
    fn single_error_stops_bounded_run() {
        let executor = ScriptedExecutor::new(vec![improved("a"), timed_out(), improved("c")]);
        let mut control = ScriptedControl::new(vec![Decision::Continue]);
        let state = LoopState::bounded("plan", 5).expect("state");

        let (outcome, reports) = run(&executor, &mut control, state);

        assert_eq!(executor.calls(), 2);
        assert_eq!(outcome.stop, StopReason::Failed(RunStatus::Timeout));
        assert_eq!(outcome.exit_code(), exit_codes::FAILED);
        assert!(reports[1].summary.contains("timed out"));
    }

    #[test]
    fn missing_marker_keeps_bounded_run_going() {
        let executor = ScriptedExecutor::new(vec![
            unmarked("line one\nline two\nline three\nline four"),
            completed("done"),
        ]);
        let mut control = ScriptedControl::new(vec![Decision::Continue]);
        let state = LoopState::bounded("plan", 3).expect("state");

        let (outcome, reports) = run(&executor, &mut control, state);

        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(reports[0].status, RunStatus::MissingMarker);
        assert_eq!(reports[0].summary, "line two line three line four");
        assert!(
            reports[0]
                .detail
                .as_deref()
                .unwrap_or_default()
                .contains("Output preview: line one")
        );
    }

    #[test]
    fn cancel_from_menu_stops_without_another_invocation() {
        let executor = ScriptedExecutor::new(vec![improved("a"), improved("b")]);
        let mut control = ScriptedControl::new(vec![Decision::Cancel]);
        let state = LoopState::bounded("plan", 5).expect("state");

        let (outcome, _) = run(&executor, &mut control, state);

        assert_eq!(executor.calls(), 1);
        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert_eq!(outcome.exit_code(), exit_codes::INCOMPLETE);
    }

    #[test]
    fn confirmed_edits_change_plan_and_budget() {
        let executor = ScriptedExecutor::new(vec![improved("a"), improved("b"), improved("c")]);
        let mut control = ScriptedControl::new(vec![
            Decision::Apply(StagedEdits {
                plan: Some("second plan".to_string()),
                remaining: Some(1),
            }),
        ]);
        let state = LoopState::bounded("first plan", 5).expect("state");

        let (outcome, _) = run(&executor, &mut control, state);

        assert_eq!(executor.calls(), 2);
        let prompts = executor.prompts();
        assert!(prompts[0].contains("first plan"));
        assert!(prompts[1].contains("second plan"));
        assert_eq!(outcome.stop, StopReason::MaxIterations);
    }

    #[test]
    fn remaining_set_to_zero_stops_before_next_invocation() {
        let executor = ScriptedExecutor::new(vec![improved("a"), improved("b")]);
        let mut control = ScriptedControl::new(vec![Decision::Apply(StagedEdits {
            plan: None,
            remaining: Some(0),
        })]);
        let state = LoopState::bounded("plan", 5).expect("state");

        let (outcome, _) = run(&executor, &mut control, state);

        assert_eq!(executor.calls(), 1);
        assert_eq!(outcome.stop, StopReason::MaxIterations);
    }

    #[test]
    fn unbounded_error_counter_resets_on_success() {
        let mut results = vec![improved("ok"); 3];
        results.push(timed_out());
        results.push(timed_out());
        results.extend(vec![improved("ok"); 5]);
        let executor = ScriptedExecutor::new(results);
        let mut control = ScriptedControl::new(Vec::new());
        let state = LoopState::unbounded("plan", Some(10)).expect("state");

        let (outcome, reports) = run(&executor, &mut control, state);

        assert_eq!(executor.calls(), 10);
        assert_eq!(reports[4].consecutive_errors, 2);
        assert_eq!(reports[5].consecutive_errors, 0);
        assert_eq!(outcome.stop, StopReason::MaxIterations);
        assert_eq!(outcome.exit_code(), exit_codes::INCOMPLETE);
        assert!(control.seen().is_empty());
    }

    #[test]
    fn unbounded_stops_after_three_consecutive_errors() {
        let executor = ScriptedExecutor::new(vec![
            improved("ok"),
            process_error("boom"),
            timed_out(),
            process_error("boom again"),
            improved("never reached"),
        ]);
        let mut control = ScriptedControl::new(Vec::new());
        let state = LoopState::unbounded("plan", None).expect("state");

        let (outcome, _) = run(&executor, &mut control, state);

        assert_eq!(executor.calls(), 4);
        assert_eq!(
            outcome.stop,
            StopReason::ConsecutiveErrors {
                count: 3,
                last: RunStatus::ProcessError,
            }
        );
        assert_eq!(outcome.exit_code(), exit_codes::FAILED);
    }

    #[test]
    fn unbounded_ignores_completion() {
        let executor = ScriptedExecutor::new(vec![completed("done"), completed("done again")]);
        let mut control = ScriptedControl::new(Vec::new());
        let state = LoopState::unbounded("plan", Some(2)).expect("state");

        let (outcome, _) = run(&executor, &mut control, state);

        assert_eq!(executor.calls(), 2);
        assert_eq!(outcome.stop, StopReason::MaxIterations);
    }

    #[test]
    fn usage_accumulates_across_iterations() {
        let executor = ScriptedExecutor::new(vec![
            with_tokens(improved("a"), 1_000, 200),
            improved("no usage"),
            with_tokens(completed("b"), 3_000, 400),
        ]);
        let mut control = ScriptedControl::new(Vec::new());
        let state = LoopState::bounded("plan", 5)
            .expect("state")
            .with_auto_continue(true);

        let (outcome, reports) = run(&executor, &mut control, state);

        assert_eq!(reports[0].totals.total_tokens(), 1_200);
        assert_eq!(reports[1].usage, None);
        assert_eq!(outcome.usage.total_tokens(), 4_600);
        assert_eq!(outcome.usage.records(), 2);
    }

    #[test]
    fn interrupt_during_invocation_cancels() {
        let cancel = CancelToken::new();
        let executor = ScriptedExecutor::new(vec![improved("a"), improved("b")])
            .cancelling_on_call(2, cancel.clone());
        let mut control = ScriptedControl::new(Vec::new());
        let state = LoopState::unbounded("plan", None).expect("state");

        let outcome = run_loop(&executor, &mut control, &config(), state, &cancel, |_| {})
            .expect("loop");

        assert_eq!(executor.calls(), 2);
        assert_eq!(outcome.iterations_run, 2);
        assert_eq!(outcome.stop, StopReason::Cancelled);
    }

    #[test]
    fn pending_cancel_prevents_first_invocation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let executor = ScriptedExecutor::new(vec![improved("a")]);
        let mut control = ScriptedControl::new(Vec::new());
        let state = LoopState::bounded("plan", 3).expect("state");

        let outcome = run_loop(&executor, &mut control, &config(), state, &cancel, |_| {})
            .expect("loop");

        assert_eq!(executor.calls(), 0);
        assert_eq!(outcome.stop, StopReason::Cancelled);
    }

    #[test]
    fn started_events_carry_iteration_and_limit() {
        let executor = ScriptedExecutor::new(vec![improved("a"), improved("b")]);
        let mut control = ScriptedControl::new(Vec::new());
        let state = LoopState::bounded("plan", 2)
            .expect("state")
            .with_auto_continue(true);
        let mut started = Vec::new();

        run_loop(&executor, &mut control, &config(), state, &CancelToken::new(), |event| {
            if let LoopEvent::Started { iteration, limit } = event {
                started.push((iteration, limit));
            }
        })
        .expect("loop");

        assert_eq!(started, vec![(1, Some(2)), (2, Some(2))]);
    }

    #[test]
    fn huge_remaining_count_saturates_limit() {
        let executor = ScriptedExecutor::new(vec![improved("a"), improved("b")]);
        let mut control = ScriptedControl::new(vec![
            Decision::Apply(StagedEdits {
                plan: None,
                remaining: Some(u32::MAX),
            }),
            Decision::Cancel,
        ]);
        let state = LoopState::bounded("plan", 5).expect("state");
        let mut limits = Vec::new();

        let outcome = run_loop(&executor, &mut control, &config(), state, &CancelToken::new(), |event| {
            if let LoopEvent::Started { limit, .. } = event {
                limits.push(limit);
            }
        })
        .expect("loop");

        assert_eq!(limits, vec![Some(5), Some(u32::MAX)]);
        assert_eq!(control.seen()[1].remaining, u32::MAX - 1);
        assert_eq!(outcome.stop, StopReason::Cancelled);
    }
}
