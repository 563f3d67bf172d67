//! Strategy table for the supported agent CLIs.
//!
//! Each agent differs only in its binary name, default model, how the prompt
//! and model reach the process, and the shape of its JSON output. Everything
//! else (supervision, classification, accounting) is shared.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::usage::TokenUsage;

/// Supported agent CLIs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Claude,
    OpenCode,
}

/// Permission level requested from the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The agent may edit the working directory without asking.
    FullAccess,
    /// Plan restructuring only reads; no permission bypass.
    ReadOnly,
}

/// Fully resolved process invocation for one agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Prompt bytes fed on stdin, when the agent reads it from there.
    pub stdin: Option<String>,
}

/// Text and usage recovered from an agent's stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

impl AgentKind {
    pub const ALL: [AgentKind; 2] = [AgentKind::Claude, AgentKind::OpenCode];

    pub fn name(self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::OpenCode => "opencode",
        }
    }

    pub fn binary(self) -> &'static str {
        self.name()
    }

    pub fn default_model(self) -> Option<&'static str> {
        match self {
            AgentKind::Claude => None,
            AgentKind::OpenCode => Some("opencode/glm-4.7-free"),
        }
    }

    /// The explicit model, or this agent's default.
    pub fn resolve_model(self, model: Option<&str>) -> Option<String> {
        model
            .map(str::to_string)
            .or_else(|| self.default_model().map(str::to_string))
    }

    /// Build the command line for `prompt`.
    pub fn command(self, prompt: &str, model: Option<&str>, access: Access) -> CommandSpec {
        let mut args: Vec<String> = Vec::new();
        let stdin = match self {
            AgentKind::Claude => {
                args.push("-p".to_string());
                if access == Access::FullAccess {
                    args.push("--dangerously-skip-permissions".to_string());
                }
                args.extend(["--output-format".to_string(), "json".to_string()]);
                Some(prompt.to_string())
            }
            AgentKind::OpenCode => {
                args.extend([
                    "run".to_string(),
                    prompt.to_string(),
                    "--format".to_string(),
                    "json".to_string(),
                ]);
                None
            }
        };
        if let Some(model) = self.resolve_model(model) {
            args.extend(["--model".to_string(), model]);
        }
        CommandSpec {
            program: self.binary().to_string(),
            args,
            stdin,
        }
    }

    /// Recover the agent's text and usage from raw stdout.
    pub fn parse_output(self, raw: &str) -> AgentReply {
        match self {
            AgentKind::Claude => parse_claude_output(raw),
            AgentKind::OpenCode => parse_opencode_output(raw),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AgentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        AgentKind::ALL
            .into_iter()
            .find(|agent| agent.name() == s.trim())
            .ok_or_else(|| anyhow!("unknown agent type: {s} (available: claude, opencode)"))
    }
}

/// Claude prints one JSON object with a `result` field; anything else is text.
fn parse_claude_output(raw: &str) -> AgentReply {
    let data = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(data @ Value::Object(_)) => data,
        _ => {
            return AgentReply {
                text: raw.to_string(),
                usage: None,
            };
        }
    };
    let text = match data.get("result") {
        Some(Value::String(s)) => s.clone(),
        Some(result @ Value::Object(obj)) => match obj.get("text") {
            Some(Value::String(s)) => s.clone(),
            _ => result.to_string(),
        },
        _ => String::new(),
    };
    AgentReply {
        text,
        usage: parse_claude_usage(&data),
    }
}

/// Usage lives under `usage`, or under `result.usage` in older builds.
fn parse_claude_usage(data: &Value) -> Option<TokenUsage> {
    let usage = data
        .get("usage")
        .filter(|v| v.is_object())
        .or_else(|| data.get("result").and_then(|r| r.get("usage")))
        .filter(|v| v.is_object())?;
    let usage = TokenUsage {
        input_tokens: count(usage, "input_tokens"),
        output_tokens: count(usage, "output_tokens"),
        cache_read_tokens: count(usage, "cache_read_input_tokens"),
        cache_creation_tokens: count(usage, "cache_creation_input_tokens"),
    };
    (!usage.is_empty()).then_some(usage)
}

/// OpenCode streams NDJSON events; text arrives in `text` events and usage in
/// the first `step_finish` event that carries token counts.
fn parse_opencode_output(raw: &str) -> AgentReply {
    let mut text = String::new();
    let mut usage: Option<TokenUsage> = None;

    for line in raw.trim().lines() {
        if line.trim().is_empty() {
            continue;
        }
        let event: Value = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(_) => {
                text.push_str(line);
                text.push('\n');
                continue;
            }
        };
        let part = event.get("part");
        match event.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(chunk) = part.and_then(|p| p.get("text")).and_then(Value::as_str) {
                    text.push_str(chunk);
                }
            }
            Some("step_finish") if usage.is_none() => {
                if let Some(tokens) = part.and_then(|p| p.get("tokens")) {
                    let cache = tokens.get("cache");
                    let candidate = TokenUsage {
                        input_tokens: count(tokens, "input"),
                        output_tokens: count(tokens, "output"),
                        cache_read_tokens: cache.map_or(0, |c| count(c, "read")),
                        cache_creation_tokens: cache.map_or(0, |c| count(c, "write")),
                    };
                    if !candidate.is_empty() {
                        usage = Some(candidate);
                    }
                }
            }
            _ => {}
        }
    }

    if text.is_empty() {
        text = raw.to_string();
    }
    AgentReply { text, usage }
}

fn count(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_command_reads_prompt_from_stdin() {
        let spec = AgentKind::Claude.command("do it", None, Access::FullAccess);
        assert_eq!(spec.program, "claude");
        assert_eq!(
            spec.args,
            vec![
                "-p",
                "--dangerously-skip-permissions",
                "--output-format",
                "json"
            ]
        );
        assert_eq!(spec.stdin.as_deref(), Some("do it"));
    }

    #[test]
    fn claude_read_only_drops_permission_bypass() {
        let spec = AgentKind::Claude.command("plan", Some("opus"), Access::ReadOnly);
        assert_eq!(
            spec.args,
            vec!["-p", "--output-format", "json", "--model", "opus"]
        );
    }

    #[test]
    fn opencode_passes_prompt_as_argument_with_default_model() {
        let spec = AgentKind::OpenCode.command("do it", None, Access::FullAccess);
        assert_eq!(spec.program, "opencode");
        assert_eq!(
            spec.args,
            vec![
                "run",
                "do it",
                "--format",
                "json",
                "--model",
                "opencode/glm-4.7-free"
            ]
        );
        assert_eq!(spec.stdin, None);
    }

    #[test]
    fn explicit_model_overrides_default() {
        let spec = AgentKind::OpenCode.command("p", Some("other/model"), Access::FullAccess);
        assert_eq!(spec.args.last().map(String::as_str), Some("other/model"));
    }

    #[test]
    fn parse_agent_names() {
        assert_eq!("claude".parse::<AgentKind>().expect("claude"), AgentKind::Claude);
        assert_eq!(
            "opencode".parse::<AgentKind>().expect("opencode"),
            AgentKind::OpenCode
        );
        let err = "codex".parse::<AgentKind>().unwrap_err();
        assert!(err.to_string().contains("unknown agent type"));
    }

    #[test]
    fn claude_json_result_and_usage() {
        let raw = r#"{"result": "Making progress. <Improved>half</Improved>",
            "usage": {"input_tokens": 1800, "output_tokens": 650, "cache_read_input_tokens": 12}}"#;
        let reply = AgentKind::Claude.parse_output(raw);
        assert!(reply.text.contains("<Improved>half</Improved>"));
        let usage = reply.usage.expect("usage");
        assert_eq!(usage.input_tokens, 1800);
        assert_eq!(usage.output_tokens, 650);
        assert_eq!(usage.cache_read_tokens, 12);
    }

    #[test]
    fn claude_usage_nested_in_result() {
        let raw = r#"{"result": {"text": "hi", "usage": {"input_tokens": 5, "output_tokens": 1}}}"#;
        let reply = AgentKind::Claude.parse_output(raw);
        assert_eq!(reply.text, "hi");
        assert_eq!(reply.usage, Some(TokenUsage::new(5, 1)));
    }

    #[test]
    fn claude_zero_usage_is_absent() {
        let raw = r#"{"result": "x", "usage": {"input_tokens": 0, "output_tokens": 0}}"#;
        assert_eq!(AgentKind::Claude.parse_output(raw).usage, None);
    }

    #[test]
    fn claude_plain_text_is_scanned_as_is() {
        let reply = AgentKind::Claude.parse_output("not json <Completed>ok</Completed>");
        assert_eq!(reply.text, "not json <Completed>ok</Completed>");
        assert_eq!(reply.usage, None);
    }

    #[test]
    fn opencode_ndjson_concatenates_text_and_reads_first_usage() {
        let raw = concat!(
            r#"{"type":"step_start","part":{}}"#,
            "\n",
            r#"{"type":"text","part":{"text":"<Improved>did "}}"#,
            "\n",
            r#"{"type":"text","part":{"text":"a thing</Improved>"}}"#,
            "\n",
            r#"{"type":"step_finish","part":{"tokens":{"input":300,"output":40,"cache":{"read":9,"write":2}}}}"#,
            "\n",
            r#"{"type":"step_finish","part":{"tokens":{"input":1,"output":1}}}"#,
            "\n",
        );
        let reply = AgentKind::OpenCode.parse_output(raw);
        assert_eq!(reply.text, "<Improved>did a thing</Improved>");
        assert_eq!(
            reply.usage,
            Some(TokenUsage {
                input_tokens: 300,
                output_tokens: 40,
                cache_read_tokens: 9,
                cache_creation_tokens: 2,
            })
        );
    }

    #[test]
    fn opencode_keeps_non_json_lines() {
        let raw = "warning: something\n{\"type\":\"text\",\"part\":{\"text\":\"done\"}}\n";
        let reply = AgentKind::OpenCode.parse_output(raw);
        assert_eq!(reply.text, "warning: something\ndone");
    }

    #[test]
    fn opencode_without_text_events_falls_back_to_raw() {
        let raw = "{\"type\":\"step_start\"}\n";
        let reply = AgentKind::OpenCode.parse_output(raw);
        assert_eq!(reply.text, raw);
    }
}
