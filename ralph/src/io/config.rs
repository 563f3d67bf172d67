//! Optional configuration stored in `ralph.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::Tier;
use crate::core::state::DEFAULT_MAX_CONSECUTIVE_ERRORS;
use crate::io::agent::AgentKind;
use crate::io::executor::DEFAULT_OUTPUT_LIMIT_BYTES;

/// File looked up in the current directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "ralph.toml";

/// Ralph configuration (TOML).
///
/// Every field is optional; command-line flags override these values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RalphConfig {
    /// Agent used when `--agent` is not given.
    pub agent: AgentKind,

    /// Per-iteration timeout in seconds for `run` and `run-endlessly`.
    pub timeout_secs: u64,

    /// Timeout in seconds for `plan`.
    pub plan_timeout_secs: u64,

    /// Consecutive errors that stop `run-endlessly`.
    pub max_consecutive_errors: u32,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Tier highlighted in usage summaries.
    pub tier: Tier,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            agent: AgentKind::Claude,
            timeout_secs: 300,
            plan_timeout_secs: 120,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            tier: Tier::Pro,
        }
    }
}

impl RalphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.plan_timeout_secs == 0 {
            return Err(anyhow!("plan_timeout_secs must be > 0"));
        }
        if self.max_consecutive_errors == 0 {
            return Err(anyhow!("max_consecutive_errors must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RalphConfig::default()`.
pub fn load_config(path: &Path) -> Result<RalphConfig> {
    if !path.exists() {
        let cfg = RalphConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RalphConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Resolve the config path: an explicit path must exist, the default may not.
pub fn resolve_config(explicit: Option<&Path>) -> Result<RalphConfig> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(anyhow!("config file does not exist: {}", path.display()));
            }
            load_config(path)
        }
        None => load_config(&PathBuf::from(DEFAULT_CONFIG_FILE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RalphConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ralph.toml");
        fs::write(&path, "agent = \"opencode\"\ntier = \"max20x\"\ntimeout_secs = 60\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.agent, AgentKind::OpenCode);
        assert_eq!(cfg.tier, Tier::Max20x);
        assert_eq!(cfg.timeout_secs, 60);
        assert_eq!(cfg.plan_timeout_secs, 120);
        assert_eq!(cfg.max_consecutive_errors, 3);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ralph.toml");
        fs::write(&path, "timeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("timeout_secs must be > 0"));
    }

    #[test]
    fn unknown_agent_fails_to_parse() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ralph.toml");
        fs::write(&path, "agent = \"codex\"\n").expect("write");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_config(Some(&temp.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file does not exist"));
    }
}
