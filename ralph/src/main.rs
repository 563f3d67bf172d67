//! Ralph: run a coding agent against a folder until the plan is done.
//!
//! `run` iterates a bounded number of times with optional prompts between
//! rounds, `run-endlessly` keeps improving until errors pile up or the cap is
//! hit, and `plan` restructures a plan into small, ordered steps.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use ralph::core::budget::Tier;
use ralph::core::state::LoopState;
use ralph::exit_codes;
use ralph::io::agent::AgentKind;
use ralph::io::config::{RalphConfig, resolve_config};
use ralph::io::control::{ControlSurface, TerminalControl, Unattended, stdin_is_terminal};
use ralph::io::executor::{AgentExecutor, check_available};
use ralph::io::plan::{resolve_plan_text, write_plan};
use ralph::io::signal::{CancelToken, install_interrupt_handler};
use ralph::logging;
use ralph::looping::{LoopConfig, LoopEvent, LoopOutcome, run_loop};
use ralph::planning::{PlanConfig, PlanStatus, improve_plan};
use ralph::report;

#[derive(Parser)]
#[command(
    name = "ralph",
    version,
    about = "Iterative AI coding-agent loop runner"
)]
struct Cli {
    /// Config file (defaults to `ralph.toml` in the current directory).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent up to N times, stopping when it reports completion.
    Run {
        /// Folder the agent works in.
        target: PathBuf,
        #[command(flatten)]
        source: PlanSource,
        /// Maximum number of iterations.
        #[arg(short = 'n', long)]
        iterations: u32,
        /// Prompt between iterations when stdin is a terminal (default).
        #[arg(long, overrides_with = "no_interactive")]
        interactive: bool,
        /// Never prompt; continue automatically.
        #[arg(long, overrides_with = "interactive")]
        no_interactive: bool,
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Keep improving until three consecutive errors or the optional cap.
    RunEndlessly {
        /// Folder the agent works in.
        target: PathBuf,
        #[command(flatten)]
        source: PlanSource,
        /// Stop after this many iterations.
        #[arg(long)]
        max_iterations: Option<u32>,
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Restructure a plan into small, ordered, verifiable steps.
    Plan {
        #[command(flatten)]
        source: PlanSource,
        /// Write the improved plan here instead of stdout.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        #[command(flatten)]
        agent: AgentArgs,
    },
}

#[derive(Args)]
struct PlanSource {
    /// Plan text.
    #[arg(short = 'p', long)]
    plan: Option<String>,
    /// File containing the plan.
    #[arg(short = 'f', long, value_name = "PATH")]
    plan_file: Option<PathBuf>,
}

#[derive(Args)]
struct AgentArgs {
    /// Agent CLI: claude or opencode.
    #[arg(short, long)]
    agent: Option<AgentKind>,
    /// Model passed to the agent.
    #[arg(short, long)]
    model: Option<String>,
    /// Timeout in seconds (default 300 for runs, 120 for plan).
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<u64>,
    /// Quota tier highlighted in usage summaries: pro, max5x or max20x.
    #[arg(long)]
    tier: Option<Tier>,
    /// Debug logging on stderr.
    #[arg(short, long)]
    verbose: bool,
}

impl Command {
    fn agent_args(&self) -> &AgentArgs {
        match self {
            Command::Run { agent, .. }
            | Command::RunEndlessly { agent, .. }
            | Command::Plan { agent, .. } => agent,
        }
    }
}

/// Values resolved from flags over config.
struct Resolved {
    agent: AgentKind,
    model: Option<String>,
    timeout: Duration,
    tier: Tier,
}

impl Resolved {
    fn new(args: &AgentArgs, config: &RalphConfig, default_timeout_secs: u64) -> Result<Self> {
        let timeout_secs = args.timeout.unwrap_or(default_timeout_secs);
        if timeout_secs == 0 {
            bail!("--timeout must be > 0");
        }
        Ok(Self {
            agent: args.agent.unwrap_or(config.agent),
            model: args.model.clone(),
            timeout: Duration::from_secs(timeout_secs),
            tier: args.tier.unwrap_or(config.tier),
        })
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::FAILED
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    logging::init(cli.command.agent_args().verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = resolve_config(cli.config.as_deref())?;
    match cli.command {
        Command::Run {
            target,
            source,
            iterations,
            interactive,
            no_interactive,
            agent,
        } => {
            let resolved = Resolved::new(&agent, &config, config.timeout_secs)?;
            let plan = resolve_plan_text(source.plan.as_deref(), source.plan_file.as_deref())?;
            let prompts = (interactive || !no_interactive) && stdin_is_terminal(&io::stdin());
            let state = LoopState::bounded(plan, iterations)?
                .with_tier(resolved.tier)
                .with_auto_continue(!prompts);
            println!(
                "Running {} in {} for up to {iterations} iteration{}",
                resolved.agent,
                target.display(),
                if iterations == 1 { "" } else { "s" }
            );
            if prompts {
                cmd_loop(&config, &resolved, target, state, |cancel| {
                    TerminalControl::stdio().with_cancel(cancel.clone())
                })
            } else {
                cmd_loop(&config, &resolved, target, state, |_| Unattended)
            }
        }
        Command::RunEndlessly {
            target,
            source,
            max_iterations,
            agent,
        } => {
            let resolved = Resolved::new(&agent, &config, config.timeout_secs)?;
            let plan = resolve_plan_text(source.plan.as_deref(), source.plan_file.as_deref())?;
            let state = LoopState::unbounded(plan, max_iterations)?
                .with_tier(resolved.tier)
                .with_max_consecutive_errors(config.max_consecutive_errors);
            match max_iterations {
                Some(cap) => println!(
                    "Running {} in {} endlessly (cap: {cap} iterations, Ctrl-C to stop)",
                    resolved.agent,
                    target.display()
                ),
                None => println!(
                    "Running {} in {} endlessly (Ctrl-C to stop)",
                    resolved.agent,
                    target.display()
                ),
            }
            cmd_loop(&config, &resolved, target, state, |_| Unattended)
        }
        Command::Plan {
            source,
            output,
            agent,
        } => {
            let resolved = Resolved::new(&agent, &config, config.plan_timeout_secs)?;
            let plan = resolve_plan_text(source.plan.as_deref(), source.plan_file.as_deref())?;
            cmd_plan(&config, &resolved, &plan, output.as_deref(), agent.verbose)
        }
    }
}

fn cmd_loop<C: ControlSurface>(
    config: &RalphConfig,
    resolved: &Resolved,
    target: PathBuf,
    state: LoopState,
    make_control: impl FnOnce(&CancelToken) -> C,
) -> Result<i32> {
    check_available(resolved.agent)?;
    let cancel = install_interrupt_handler()?;
    let mut control = make_control(&cancel);
    let executor = AgentExecutor::new(config.output_limit_bytes, cancel.clone());
    let loop_config = LoopConfig {
        agent: resolved.agent,
        workdir: target,
        timeout: resolved.timeout,
        model: resolved.model.clone(),
    };
    let tier = resolved.tier;
    let outcome = run_loop(
        &executor,
        &mut control,
        &loop_config,
        state,
        &cancel,
        |event| match event {
            LoopEvent::Started { iteration, limit } => {
                println!("\n{}", report::iteration_header(iteration, limit));
            }
            LoopEvent::Finished(iteration) => {
                println!("{}", report::iteration_summary(iteration, tier));
            }
        },
    )?;
    print_outcome(&outcome);
    Ok(outcome.exit_code())
}

fn print_outcome(outcome: &LoopOutcome) {
    println!("\n{}", report::final_status(outcome));
    if let Some(summary) = report::usage_summary(&outcome.usage, outcome.tier) {
        println!("\n{summary}");
    }
}

fn cmd_plan(
    config: &RalphConfig,
    resolved: &Resolved,
    plan: &str,
    output: Option<&Path>,
    verbose: bool,
) -> Result<i32> {
    check_available(resolved.agent)?;
    let cancel = install_interrupt_handler()?;
    let executor = AgentExecutor::new(config.output_limit_bytes, cancel);
    let plan_config = PlanConfig {
        agent: resolved.agent,
        workdir: std::env::current_dir().context("resolve current directory")?,
        timeout: resolved.timeout,
        model: resolved.model.clone(),
    };
    eprintln!("Improving plan with {}...", resolved.agent);
    let outcome = improve_plan(&executor, &plan_config, plan)?;

    if let Some(reasoning) = &outcome.reasoning {
        eprintln!("\nReasoning:\n{reasoning}\n");
    }
    if verbose && outcome.status != PlanStatus::Success && !outcome.raw_output.trim().is_empty() {
        eprintln!("\nRaw output:\n{}\n", outcome.raw_output.trim_end());
    }
    if let Some(improved) = &outcome.improved_plan {
        match output {
            Some(path) => {
                write_plan(path, improved)?;
                eprintln!("Improved plan written to {}", path.display());
            }
            None => println!("{improved}"),
        }
    }
    eprintln!("{}", report::plan_status(&outcome));
    if let Some(summary) = report::usage_summary(&outcome.usage, resolved.tier) {
        eprintln!("\n{summary}");
    }
    Ok(outcome.exit_code())
}
