//! `ralph plan`: one read-only agent call that restructures a plan into
//! small, ordered, verifiable steps.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use tracing::{info, warn};

use crate::core::classifier::{extract_between, pair_pattern};
use crate::core::state::validate_plan;
use crate::core::types::ProcessExit;
use crate::core::usage::UsageTotals;
use crate::exit_codes;
use crate::io::agent::{Access, AgentKind};
use crate::io::executor::{Executor, InvokeRequest};
use crate::io::prompt::plan_improvement_prompt;

static IMPROVED_PLAN: LazyLock<Regex> =
    LazyLock::new(|| pair_pattern("<improved_plan>", "</improved_plan>"));
static REASONING: LazyLock<Regex> = LazyLock::new(|| pair_pattern("<reasoning>", "</reasoning>"));

/// Settings for a plan-improvement call.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub agent: AgentKind,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Success,
    Timeout,
    ProcessError,
    /// The agent answered but without an `<improved_plan>` section.
    ParseError,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Success => "SUCCESS",
            PlanStatus::Timeout => "TIMEOUT",
            PlanStatus::ProcessError => "PROCESS_ERROR",
            PlanStatus::ParseError => "PARSE_ERROR",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a plan-improvement call.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub status: PlanStatus,
    pub improved_plan: Option<String>,
    pub reasoning: Option<String>,
    pub error: Option<String>,
    /// The agent's reply as received, kept for diagnosing failures.
    pub raw_output: String,
    pub usage: UsageTotals,
    pub duration: Duration,
}

impl PlanOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            PlanStatus::Success => exit_codes::OK,
            _ => exit_codes::FAILED,
        }
    }
}

/// Ask the agent to restructure `plan`. A blank plan is a configuration error.
pub fn improve_plan<E: Executor>(
    executor: &E,
    config: &PlanConfig,
    plan: &str,
) -> Result<PlanOutcome> {
    validate_plan(plan)?;
    let request = InvokeRequest {
        agent: config.agent,
        prompt: plan_improvement_prompt(plan)?,
        workdir: config.workdir.clone(),
        timeout: config.timeout,
        model: config.model.clone(),
        access: Access::ReadOnly,
    };
    info!(agent = %config.agent, "requesting plan improvement");
    let result = executor.invoke(&request);

    let mut usage = UsageTotals::new();
    usage.record(result.usage.as_ref());

    let failure = match result.exit {
        ProcessExit::Success => None,
        ProcessExit::TimedOut => Some(PlanStatus::Timeout),
        ProcessExit::Failed { .. } | ProcessExit::Cancelled => Some(PlanStatus::ProcessError),
    };
    if let Some(status) = failure {
        warn!(status = %status, error = ?result.error, "plan improvement failed");
        return Ok(PlanOutcome {
            status,
            improved_plan: None,
            reasoning: None,
            error: result.error,
            raw_output: result.text,
            usage,
            duration: result.duration,
        });
    }

    let reasoning = extract_between(&REASONING, &result.text).filter(|text| !text.is_empty());
    let improved_plan =
        extract_between(&IMPROVED_PLAN, &result.text).filter(|text| !text.is_empty());
    let (status, error) = match improved_plan {
        Some(_) => (PlanStatus::Success, None),
        None => (
            PlanStatus::ParseError,
            Some("Could not find <improved_plan> section in output".to_string()),
        ),
    };
    Ok(PlanOutcome {
        status,
        improved_plan,
        reasoning,
        error,
        raw_output: result.text,
        usage,
        duration: result.duration,
    })
}
