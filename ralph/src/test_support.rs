//! Scripted collaborators for loop and planning tests.
//!
//! Enabled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{InvocationResult, ProcessExit};
use crate::core::usage::TokenUsage;
use crate::io::control::{ControlSurface, Decision, PromptContext};
use crate::io::executor::{Executor, InvokeRequest};
use crate::io::signal::CancelToken;

const SCRIPTED_DURATION: Duration = Duration::from_millis(10);

/// Successful run whose text carries an `<Improved>` marker.
pub fn improved(message: &str) -> InvocationResult {
    InvocationResult::success(format!("<Improved>{message}</Improved>"), SCRIPTED_DURATION)
}

/// Successful run whose text carries a `<Completed>` marker.
pub fn completed(message: &str) -> InvocationResult {
    InvocationResult::success(format!("<Completed>{message}</Completed>"), SCRIPTED_DURATION)
}

/// Successful run without any marker.
pub fn unmarked(text: &str) -> InvocationResult {
    InvocationResult::success(text, SCRIPTED_DURATION)
}

pub fn timed_out() -> InvocationResult {
    InvocationResult::failed(
        ProcessExit::TimedOut,
        "Process timed out after 300 seconds",
        SCRIPTED_DURATION,
    )
}

pub fn process_error(message: &str) -> InvocationResult {
    InvocationResult::failed(
        ProcessExit::Failed { code: Some(1) },
        message,
        SCRIPTED_DURATION,
    )
}

/// Attach usage to a scripted result.
pub fn with_tokens(result: InvocationResult, input: u64, output: u64) -> InvocationResult {
    result.with_usage(TokenUsage::new(input, output))
}

/// Executor that replays a queue of results and records every request.
///
/// An exhausted queue yields a process error so a runaway loop fails loudly.
pub struct ScriptedExecutor {
    results: RefCell<VecDeque<InvocationResult>>,
    requests: RefCell<Vec<InvokeRequest>>,
    cancel_on_call: Option<(usize, CancelToken)>,
}

impl ScriptedExecutor {
    pub fn new(results: Vec<InvocationResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            requests: RefCell::new(Vec::new()),
            cancel_on_call: None,
        }
    }

    /// Trip `token` while serving call number `call` (1-based), as an
    /// interrupt arriving mid-invocation would.
    pub fn cancelling_on_call(mut self, call: usize, token: CancelToken) -> Self {
        self.cancel_on_call = Some((call, token));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.borrow().clone()
    }

    /// Prompts sent so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }
}

impl Executor for ScriptedExecutor {
    fn invoke(&self, request: &InvokeRequest) -> InvocationResult {
        self.requests.borrow_mut().push(request.clone());
        let call = self.calls();
        if let Some((_, token)) = self.cancel_on_call.as_ref().filter(|(at, _)| *at == call) {
            token.cancel();
            return InvocationResult::failed(
                ProcessExit::Cancelled,
                "Cancelled by interrupt",
                SCRIPTED_DURATION,
            );
        }
        self.results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| process_error("scripted executor exhausted"))
    }
}

/// Prompt snapshot captured by [`ScriptedControl`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenPrompt {
    pub iteration: u32,
    pub remaining: u32,
    pub plan: String,
}

/// Control surface that replays queued decisions.
pub struct ScriptedControl {
    decisions: VecDeque<Decision>,
    seen: Vec<SeenPrompt>,
}

impl ScriptedControl {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: decisions.into(),
            seen: Vec::new(),
        }
    }

    /// Every prompt shown so far.
    pub fn seen(&self) -> &[SeenPrompt] {
        &self.seen
    }
}

impl ControlSurface for ScriptedControl {
    fn decide(&mut self, ctx: &PromptContext<'_>) -> Result<Decision> {
        self.seen.push(SeenPrompt {
            iteration: ctx.iteration,
            remaining: ctx.remaining,
            plan: ctx.plan.to_string(),
        });
        self.decisions
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected prompt after iteration {}", ctx.iteration))
    }
}

/// Temporary directory holding a target folder and plan files.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        fs::create_dir_all(temp.path().join("target")).context("create target folder")?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Folder handed to the agent as its working directory.
    pub fn target(&self) -> PathBuf {
        self.root().join("target")
    }

    /// Write a plan file under the workspace root and return its path.
    pub fn write_plan(&self, name: &str, text: &str) -> Result<PathBuf> {
        let path = self.root().join(name);
        fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
