//! Human-readable lines printed to stdout.
//!
//! Every function returns text instead of printing so the wording is testable.

use std::fmt::Write as _;
use std::time::Duration;

use crate::core::budget::Tier;
use crate::core::state::StopReason;
use crate::core::usage::{TierUsage, UsageTotals};
use crate::looping::{IterationReport, LoopOutcome};
use crate::planning::PlanOutcome;

/// `1234567` -> `1,234,567`.
pub fn thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Clamped percentage; `100.0%+` once the ceiling is passed.
pub fn percent(usage: &TierUsage) -> String {
    if usage.over_limit() {
        format!("{:.1}%+", usage.display_percent())
    } else {
        format!("{:.1}%", usage.display_percent())
    }
}

fn seconds(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

fn plural(count: u32) -> &'static str {
    if count == 1 { "" } else { "s" }
}

pub fn iteration_header(iteration: u32, limit: Option<u32>) -> String {
    match limit {
        Some(limit) => format!("=== Iteration {iteration}/{limit} ==="),
        None => format!("=== Iteration {iteration} ==="),
    }
}

/// Status, summary and usage-to-date for one finished iteration.
pub fn iteration_summary(report: &IterationReport, tier: Tier) -> String {
    let mut out = format!(
        "[{}] {} ({})",
        report.status.as_str().to_ascii_uppercase(),
        report.summary,
        seconds(report.duration)
    );
    if let Some(detail) = &report.detail {
        let _ = write!(out, "\n  {detail}");
    }
    let this_run = report
        .usage
        .map_or_else(|| "n/a".to_string(), |usage| thousands(usage.total_tokens()));
    let to_date = report.totals.tier_usage(tier);
    let _ = write!(
        out,
        "\n  Tokens: {this_run} this iteration, {} total ({} of {tier})",
        thousands(to_date.used),
        percent(&to_date)
    );
    if report.consecutive_errors > 0 {
        let _ = write!(out, "\n  Consecutive errors: {}", report.consecutive_errors);
    }
    out
}

/// One line naming why the loop stopped.
pub fn final_status(outcome: &LoopOutcome) -> String {
    let n = outcome.iterations_run;
    let last = outcome.last_summary.as_deref().unwrap_or("no output");
    match outcome.stop {
        StopReason::Completed => {
            format!("COMPLETED after {n} iteration{}: {last}", plural(n))
        }
        StopReason::MaxIterations => format!(
            "MAX_ITERATIONS: stopped after {n} iteration{} without completion",
            plural(n)
        ),
        StopReason::Cancelled => {
            format!("CANCELLED after {n} iteration{}", plural(n))
        }
        StopReason::ConsecutiveErrors { count, last: status } => format!(
            "CONSECUTIVE_ERRORS: {count} errors in a row (last: {}): {last}",
            status.as_str().to_ascii_uppercase()
        ),
        StopReason::Failed(status) => format!(
            "FAILED on iteration {n} ({}): {last}",
            status.as_str().to_ascii_uppercase()
        ),
    }
}

/// Totals and tier table, or `None` when nothing was recorded.
pub fn usage_summary(usage: &UsageTotals, highlight: Tier) -> Option<String> {
    if usage.is_empty() {
        return None;
    }
    let rows = [
        ("Input", usage.input_tokens()),
        ("Output", usage.output_tokens()),
        ("Cache read", usage.cache_read_tokens()),
        ("Cache creation", usage.cache_creation_tokens()),
        ("Total", usage.total_tokens()),
    ];
    let mut out = String::from("Token usage:");
    for (label, value) in rows {
        let _ = write!(out, "\n  {:<15} {:>12}", format!("{label}:"), thousands(value));
    }
    out.push_str("\nTier usage (5-hour window estimate):");
    for tier_usage in usage.all_tiers() {
        let marker = if tier_usage.tier == highlight { "  <" } else { "" };
        let _ = write!(
            out,
            "\n  {:<8} {:>9} {:>8}{marker}",
            tier_usage.tier.display_name(),
            thousands(tier_usage.tier.token_limit()),
            percent(&tier_usage)
        );
    }
    Some(out)
}

/// Status line for `ralph plan`.
pub fn plan_status(outcome: &PlanOutcome) -> String {
    match &outcome.error {
        Some(error) => format!(
            "{} ({}): {error}",
            outcome.status,
            seconds(outcome.duration)
        ),
        None => format!("{} ({})", outcome.status, seconds(outcome.duration)),
    }
}
