//! Interactive control surface shown between bounded-mode iterations.
//!
//! The loop blocks inside [`ControlSurface::decide`] until the human picks an
//! action. Edits made in the settings sub-menu are staged in [`StagedEdits`]
//! and only reach the loop when confirmed.
//!
//! Terminal input is read on a helper thread, one line per request, so a
//! pending prompt can be abandoned when the [`CancelToken`] is raised.

use std::io::{self, BufRead, Stdin, Stdout, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::plan::read_plan_file;
use crate::io::signal::CancelToken;

/// How often a waiting prompt checks the cancellation flag.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Characters of the current plan shown in the main menu.
const PLAN_PREVIEW_CHARS: usize = 60;

/// What the human sees when asked for a decision.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    /// Iterations completed so far.
    pub iteration: u32,
    /// Iterations still permitted.
    pub remaining: u32,
    pub plan: &'a str,
}

/// Edits collected in one settings episode, applied only on confirm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedEdits {
    pub plan: Option<String>,
    pub remaining: Option<u32>,
}

impl StagedEdits {
    pub fn is_empty(&self) -> bool {
        self.plan.is_none() && self.remaining.is_none()
    }
}

/// Decision returned to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Continue,
    /// Continue and suppress prompts for the rest of the run.
    AutoContinue,
    Cancel,
    /// Apply confirmed edits, then continue.
    Apply(StagedEdits),
}

/// Source of human decisions for bounded mode.
pub trait ControlSurface {
    fn decide(&mut self, ctx: &PromptContext<'_>) -> Result<Decision>;
}

/// Surface for runs without a human at the keyboard: always continues.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

impl ControlSurface for Unattended {
    fn decide(&mut self, _ctx: &PromptContext<'_>) -> Result<Decision> {
        Ok(Decision::Continue)
    }
}

/// Line-oriented menu over any reader/writer pair.
pub struct TerminalControl<W> {
    requests: Sender<()>,
    lines: Receiver<io::Result<Option<String>>>,
    /// A line was requested and has not been received yet.
    pending: bool,
    output: W,
    cancel: CancelToken,
}

impl TerminalControl<Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::BufReader::new(io::stdin()), io::stdout())
    }
}

/// Whether stdin is attached to a terminal.
pub fn stdin_is_terminal(stdin: &Stdin) -> bool {
    use std::io::IsTerminal;
    stdin.is_terminal()
}

enum MenuChoice {
    Continue,
    Edit,
    AutoContinue,
    Cancel,
}

enum EditOutcome {
    Confirmed(StagedEdits),
    Discarded,
}

/// Serve one line from `input` per request until end of input or the
/// control is dropped.
fn spawn_line_reader<R: BufRead + Send + 'static>(
    mut input: R,
) -> (Sender<()>, Receiver<io::Result<Option<String>>>) {
    let (request_tx, request_rx) = mpsc::channel::<()>();
    let (line_tx, line_rx) = mpsc::channel();
    thread::spawn(move || {
        for () in request_rx {
            let mut line = String::new();
            let read = input
                .read_line(&mut line)
                .map(|n| (n > 0).then_some(line));
            let done = !matches!(read, Ok(Some(_)));
            if line_tx.send(read).is_err() || done {
                break;
            }
        }
    });
    (request_tx, line_rx)
}

impl<W: Write> TerminalControl<W> {
    pub fn new<R: BufRead + Send + 'static>(input: R, output: W) -> Self {
        let (requests, lines) = spawn_line_reader(input);
        Self {
            requests,
            lines,
            pending: false,
            output,
            cancel: CancelToken::new(),
        }
    }

    /// Abandon any prompt once `cancel` is raised.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Read one line without its terminator. `None` at end of input or on
    /// cancellation.
    fn read_line(&mut self) -> Result<Option<String>> {
        if !self.pending {
            if self.requests.send(()).is_err() {
                return Ok(None);
            }
            self.pending = true;
        }
        let read = loop {
            match self.lines.recv_timeout(CANCEL_POLL) {
                Ok(read) => break read,
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        debug!("prompt abandoned after interrupt");
                        return Ok(None);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        };
        self.pending = false;
        let Some(mut line) = read.context("read terminal input")? else {
            return Ok(None);
        };
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn say(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}").context("write terminal output")
    }

    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt}").context("write terminal output")?;
        self.output.flush().context("flush terminal output")?;
        Ok(self.read_line()?.map(|line| line.trim().to_string()))
    }

    fn main_menu(&mut self, ctx: &PromptContext<'_>) -> Result<Option<MenuChoice>> {
        self.say("")?;
        self.say(&format!(
            "Iteration {} finished, {} remaining. What would you like to do next?",
            ctx.iteration, ctx.remaining
        ))?;
        self.say(&format!("Current plan: {}", plan_preview(ctx.plan)))?;
        self.say("  [1] Continue to next iteration")?;
        self.say("  [2] Edit settings (plan, remaining iterations)")?;
        self.say("  [3] Auto-continue (skip future prompts)")?;
        self.say("  [4] Cancel")?;
        loop {
            let Some(choice) = self.ask("Choice [1-4] (default: 1): ")? else {
                return Ok(None);
            };
            let picked = match choice.as_str() {
                "" | "1" => MenuChoice::Continue,
                "2" => MenuChoice::Edit,
                "3" => MenuChoice::AutoContinue,
                "4" => MenuChoice::Cancel,
                _ => {
                    self.say("Invalid choice. Please enter 1-4.")?;
                    continue;
                }
            };
            return Ok(Some(picked));
        }
    }

    fn edit_menu(&mut self, ctx: &PromptContext<'_>) -> Result<Option<EditOutcome>> {
        let mut staged = StagedEdits::default();
        loop {
            let remaining = staged.remaining.unwrap_or(ctx.remaining);
            let plan_state = if staged.plan.is_some() {
                "replaced (staged)"
            } else {
                "unchanged"
            };
            self.say("")?;
            self.say("Edit settings (changes apply on confirm):")?;
            self.say(&format!("  [1] Replace plan with new text (plan: {plan_state})"))?;
            self.say("  [2] Replace plan from file")?;
            self.say(&format!("  [3] Set remaining iterations (currently {remaining})"))?;
            self.say("  [4] Confirm and resume")?;
            self.say("  [5] Discard changes and go back")?;
            let Some(choice) = self.ask("Choice [1-5]: ")? else {
                return Ok(None);
            };
            match choice.as_str() {
                "1" => {
                    if let Some(plan) = self.prompt_plan_text()? {
                        staged.plan = Some(plan);
                        self.say("Plan staged.")?;
                    }
                }
                "2" => match self.prompt_plan_file()? {
                    Prompted::Value(plan) => {
                        staged.plan = Some(plan);
                        self.say("Plan staged from file.")?;
                    }
                    Prompted::Back => {}
                    Prompted::Eof => return Ok(None),
                },
                "3" => match self.prompt_remaining()? {
                    Prompted::Value(count) => {
                        staged.remaining = Some(count);
                        self.say(&format!("Remaining iterations staged: {count}."))?;
                    }
                    Prompted::Back => {}
                    Prompted::Eof => return Ok(None),
                },
                "4" => {
                    if staged.is_empty() {
                        self.say("No changes staged - resuming.")?;
                    }
                    return Ok(Some(EditOutcome::Confirmed(staged)));
                }
                "5" => {
                    self.say("Changes discarded.")?;
                    return Ok(Some(EditOutcome::Discarded));
                }
                _ => self.say("Invalid choice. Please enter 1-5.")?,
            }
        }
    }

    /// Multi-line entry ending at two consecutive empty lines or end of input.
    fn prompt_plan_text(&mut self) -> Result<Option<String>> {
        self.say("")?;
        self.say("Enter new plan text (press Enter twice to finish):")?;
        self.say(&"-".repeat(40))?;
        self.output.flush().context("flush terminal output")?;

        let mut lines: Vec<String> = Vec::new();
        let mut empty_run = 0;
        while let Some(line) = self.read_line()? {
            if line.is_empty() {
                empty_run += 1;
                if empty_run >= 2 {
                    break;
                }
            } else {
                empty_run = 0;
            }
            lines.push(line);
        }
        let text = lines.join("\n").trim().to_string();
        if text.is_empty() {
            self.say("Empty plan text - keeping current plan.")?;
            return Ok(None);
        }
        Ok(Some(text))
    }

    fn prompt_plan_file(&mut self) -> Result<Prompted<String>> {
        loop {
            let Some(raw) = self.ask("Enter plan file path (empty to go back): ")? else {
                return Ok(Prompted::Eof);
            };
            if raw.is_empty() {
                return Ok(Prompted::Back);
            }
            let path = expand_home(&raw);
            match read_plan_file(&path) {
                Ok(text) if text.trim().is_empty() => {
                    self.say("File is empty - keeping current plan.")?;
                    return Ok(Prompted::Back);
                }
                Ok(text) => {
                    self.say(&format!("Loaded plan from: {}", path.display()))?;
                    return Ok(Prompted::Value(text));
                }
                Err(err) => self.say(&format!("{err:#}"))?,
            }
        }
    }

    fn prompt_remaining(&mut self) -> Result<Prompted<u32>> {
        loop {
            let Some(raw) = self.ask("Enter remaining iterations (empty to go back): ")? else {
                return Ok(Prompted::Eof);
            };
            if raw.is_empty() {
                return Ok(Prompted::Back);
            }
            match raw.parse::<u32>() {
                Ok(count) => return Ok(Prompted::Value(count)),
                Err(_) => self.say("Invalid number. Please enter a non-negative integer.")?,
            }
        }
    }
}

/// Result of a sub-prompt that may be abandoned.
enum Prompted<T> {
    Value(T),
    Back,
    Eof,
}

/// First non-empty line of `plan`, shortened for display.
fn plan_preview(plan: &str) -> String {
    let first = plan
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let multiline = plan.trim().lines().nth(1).is_some();
    let mut preview: String = first.chars().take(PLAN_PREVIEW_CHARS).collect();
    if multiline || first.chars().count() > PLAN_PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

fn expand_home(raw: &str) -> PathBuf {
    match (raw.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(raw),
    }
}

impl<W: Write> ControlSurface for TerminalControl<W> {
    fn decide(&mut self, ctx: &PromptContext<'_>) -> Result<Decision> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Decision::Cancel);
            }
            let Some(choice) = self.main_menu(ctx)? else {
                return Ok(Decision::Cancel);
            };
            match choice {
                MenuChoice::Continue => return Ok(Decision::Continue),
                MenuChoice::AutoContinue => {
                    self.say("Future prompts disabled - will auto-continue.")?;
                    return Ok(Decision::AutoContinue);
                }
                MenuChoice::Cancel => return Ok(Decision::Cancel),
                MenuChoice::Edit => match self.edit_menu(ctx)? {
                    None => return Ok(Decision::Cancel),
                    Some(EditOutcome::Discarded) => {}
                    Some(EditOutcome::Confirmed(edits)) => return Ok(Decision::Apply(edits)),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::time::Instant;

    const CTX: PromptContext<'static> = PromptContext {
        iteration: 1,
        remaining: 4,
        plan: "original plan",
    };

    fn decide(script: &str) -> (Decision, String) {
        let mut output = Vec::new();
        let decision = {
            let mut control =
                TerminalControl::new(Cursor::new(script.to_string().into_bytes()), &mut output);
            control.decide(&CTX).expect("decide")
        };
        (decision, String::from_utf8(output).expect("utf8"))
    }

    #[test]
    fn empty_choice_defaults_to_continue() {
        let (decision, _) = decide("\n");
        assert_eq!(decision, Decision::Continue);
    }

    #[test]
    fn invalid_choice_reprompts() {
        let (decision, out) = decide("9\n3\n");
        assert_eq!(decision, Decision::AutoContinue);
        assert!(out.contains("Invalid choice"));
    }

    #[test]
    fn cancel_choice() {
        let (decision, _) = decide("4\n");
        assert_eq!(decision, Decision::Cancel);
    }

    #[test]
    fn end_of_input_cancels() {
        let (decision, _) = decide("");
        assert_eq!(decision, Decision::Cancel);
        let (decision, _) = decide("2\n");
        assert_eq!(decision, Decision::Cancel);
    }

    #[test]
    fn inline_plan_and_count_are_applied_on_confirm() {
        let (decision, _) = decide("2\n1\nnew plan\nline two\n\n\n3\n7\n4\n");
        assert_eq!(
            decision,
            Decision::Apply(StagedEdits {
                plan: Some("new plan\nline two".to_string()),
                remaining: Some(7),
            })
        );
    }

    #[test]
    fn malformed_count_reprompts() {
        let (decision, out) = decide("2\n3\n-1\nabc\n0\n4\n");
        assert!(out.contains("Invalid number"));
        assert_eq!(
            decision,
            Decision::Apply(StagedEdits {
                plan: None,
                remaining: Some(0),
            })
        );
    }

    #[test]
    fn discard_returns_to_main_menu_without_edits() {
        let (decision, out) = decide("2\n3\n9\n5\n1\n");
        assert!(out.contains("Changes discarded."));
        assert_eq!(decision, Decision::Continue);
    }

    #[test]
    fn blank_inline_plan_is_not_staged() {
        let (decision, out) = decide("2\n1\n\n\n4\n");
        assert!(out.contains("Empty plan text"));
        assert_eq!(decision, Decision::Apply(StagedEdits::default()));
    }

    #[test]
    fn missing_plan_file_reprompts_then_loads() {
        let temp = tempfile::tempdir().expect("tempdir");
        let good = temp.path().join("plan.md");
        std::fs::write(&good, "file plan\n").expect("write");
        let missing = temp.path().join("missing.md");
        let script = format!("2\n2\n{}\n{}\n4\n", missing.display(), good.display());

        let (decision, out) = decide(&script);
        assert!(out.contains("Plan file does not exist"));
        assert_eq!(
            decision,
            Decision::Apply(StagedEdits {
                plan: Some("file plan\n".to_string()),
                remaining: None,
            })
        );
    }

    #[test]
    fn empty_path_goes_back_to_edit_menu() {
        let (decision, _) = decide("2\n2\n\n5\n4\n");
        assert_eq!(decision, Decision::Cancel);
    }

    #[test]
    fn main_menu_shows_plan_preview() {
        let (_, out) = decide("1\n");
        assert!(out.contains("Current plan: original plan\n"));
    }

    #[test]
    fn plan_preview_shortens_long_and_multiline_plans() {
        assert_eq!(plan_preview("\n  1. first step\n2. second"), "1. first step...");
        let long = "x".repeat(80);
        assert_eq!(plan_preview(&long), format!("{}...", "x".repeat(60)));
        assert_eq!(plan_preview("short"), "short");
    }

    /// Reader standing in for a terminal nobody types into.
    struct Silent;

    impl Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            loop {
                thread::park();
            }
        }
    }

    #[test]
    fn interrupt_while_waiting_for_input_cancels() {
        let cancel = CancelToken::new();
        let mut output = Vec::new();
        let mut control = TerminalControl::new(io::BufReader::new(Silent), &mut output)
            .with_cancel(cancel.clone());
        let trigger = cancel.clone();
        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let started = Instant::now();
        let decision = control.decide(&CTX).expect("decide");

        assert_eq!(decision, Decision::Cancel);
        assert!(started.elapsed() < Duration::from_secs(5));
        interrupter.join().expect("join");
        drop(control);
        assert!(String::from_utf8(output).expect("utf8").contains("Choice [1-4]"));
    }

    #[test]
    fn pending_interrupt_cancels_before_prompting() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut output = Vec::new();
        let mut control = TerminalControl::new(io::BufReader::new(Silent), &mut output)
            .with_cancel(cancel);

        assert_eq!(control.decide(&CTX).expect("decide"), Decision::Cancel);
        drop(control);
        assert!(output.is_empty());
    }
}
