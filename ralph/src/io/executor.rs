//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples the loop controller from the actual agent
//! backend. Tests use scripted executors that return predetermined results
//! without spawning processes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{InvocationResult, ProcessExit};
use crate::io::agent::{Access, AgentKind, CommandSpec};
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::io::signal::CancelToken;

/// Default cap on captured stdout/stderr per stream.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// Deadline for the `--version` availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub agent: AgentKind,
    /// Rendered prompt text.
    pub prompt: String,
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Hard deadline for the process.
    pub timeout: Duration,
    /// Model override; the agent default applies when `None`.
    pub model: Option<String>,
    pub access: Access,
}

/// Abstraction over agent execution backends.
pub trait Executor {
    /// Run the agent once. Failures are reported inside the result, never as a panic or error.
    fn invoke(&self, request: &InvokeRequest) -> InvocationResult;
}

/// Executor that spawns the agent CLI as a child process.
#[derive(Debug, Clone)]
pub struct AgentExecutor {
    output_limit_bytes: usize,
    cancel: CancelToken,
}

impl AgentExecutor {
    pub fn new(output_limit_bytes: usize, cancel: CancelToken) -> Self {
        Self {
            output_limit_bytes,
            cancel,
        }
    }
}

impl Executor for AgentExecutor {
    #[instrument(skip_all, fields(agent = %request.agent, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &InvokeRequest) -> InvocationResult {
        let started = Instant::now();
        if let Err(err) = check_workdir(&request.workdir) {
            warn!(err = %err, "invalid working directory");
            return InvocationResult::failed(
                ProcessExit::Failed { code: None },
                err.to_string(),
                started.elapsed(),
            );
        }

        let spec = request
            .agent
            .command(&request.prompt, request.model.as_deref(), request.access);
        info!(workdir = %request.workdir.display(), program = %spec.program, "starting agent");
        run_spec(
            request.agent,
            &spec,
            &request.workdir,
            request.timeout,
            self.output_limit_bytes,
            &self.cancel,
        )
    }
}

fn check_workdir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("Folder does not exist: {}", path.display()));
    }
    if !path.is_dir() {
        return Err(anyhow!("Path is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Spawn `spec` and convert whatever happens into an [`InvocationResult`].
pub fn run_spec(
    agent: AgentKind,
    spec: &CommandSpec,
    workdir: &Path,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> InvocationResult {
    let started = Instant::now();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).current_dir(workdir);

    let output = match run_command_with_timeout(
        cmd,
        spec.stdin.as_deref().map(str::as_bytes),
        timeout,
        output_limit_bytes,
        cancel,
    ) {
        Ok(output) => output,
        Err(err) => {
            let message = match err.downcast_ref::<std::io::Error>() {
                Some(io) if io.kind() == ErrorKind::NotFound => format!(
                    "{} CLI not found. Make sure '{}' is installed and in PATH.",
                    capitalize(agent.name()),
                    agent.binary()
                ),
                _ => format!("Unexpected error: {err:#}"),
            };
            warn!(error = %message, "agent process failed");
            return InvocationResult::failed(
                ProcessExit::Failed { code: None },
                message,
                started.elapsed(),
            );
        }
    };

    let duration = started.elapsed();
    let reply = agent.parse_output(&output.stdout_lossy());
    let (exit, error) = exit_of(&output, timeout);
    debug!(exit = ?exit, usage = ?reply.usage, "agent finished");
    InvocationResult {
        exit,
        text: reply.text,
        usage: reply.usage,
        error,
        duration,
    }
}

fn exit_of(output: &CommandOutput, timeout: Duration) -> (ProcessExit, Option<String>) {
    if output.cancelled {
        return (
            ProcessExit::Cancelled,
            Some("Cancelled by interrupt".to_string()),
        );
    }
    if output.timed_out {
        return (
            ProcessExit::TimedOut,
            Some(format!(
                "Process timed out after {} seconds",
                timeout.as_secs()
            )),
        );
    }
    if output.status.success() {
        return (ProcessExit::Success, None);
    }
    let code = output.status.code();
    let stderr = output.stderr_lossy();
    let message = if stderr.trim().is_empty() {
        match code {
            Some(code) => format!("Process exited with code {code}"),
            None => "Process terminated by signal".to_string(),
        }
    } else {
        stderr.trim().to_string()
    };
    (ProcessExit::Failed { code }, Some(message))
}

/// Confirm the agent CLI is installed by running `<binary> --version`.
pub fn check_available(agent: AgentKind) -> Result<()> {
    let binary = agent.binary();
    let mut cmd = Command::new(binary);
    cmd.arg("--version");
    let output = match run_command_with_timeout(
        cmd,
        None,
        PROBE_TIMEOUT,
        64 * 1024,
        &CancelToken::new(),
    ) {
        Ok(output) => output,
        Err(err) => {
            return match err.downcast_ref::<std::io::Error>() {
                Some(io) if io.kind() == ErrorKind::NotFound => Err(anyhow!(
                    "{binary} CLI not found in PATH. Please install {agent}."
                )),
                _ => Err(err.context(format!("check {binary} CLI"))),
            };
        }
    };
    if output.timed_out {
        return Err(anyhow!(
            "{binary} CLI did not respond within {} seconds",
            PROBE_TIMEOUT.as_secs()
        ));
    }
    if !output.status.success() {
        return Err(anyhow!(
            "{binary} CLI returned error code {}",
            output
                .status
                .code()
                .map_or_else(|| "unknown".to_string(), |c| c.to_string())
        ));
    }
    debug!(agent = %agent, version = %output.stdout_lossy().trim(), "agent available");
    Ok(())
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
