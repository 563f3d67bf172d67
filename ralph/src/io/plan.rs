//! Plan text input and output.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::core::state::validate_plan;

/// Resolve plan text from exactly one of `--plan` or `--plan-file`.
///
/// Missing, conflicting, unreadable or blank input is a configuration error.
pub fn resolve_plan_text(plan: Option<&str>, plan_file: Option<&Path>) -> Result<String> {
    let text = match (plan, plan_file) {
        (Some(_), Some(_)) => bail!("Cannot use both --plan and --plan-file"),
        (None, None) => bail!("Must provide either --plan or --plan-file"),
        (Some(text), None) => text.to_string(),
        (None, Some(path)) => read_plan_file(path)?,
    };
    validate_plan(&text)?;
    Ok(text)
}

/// Read a plan file as UTF-8 text.
pub fn read_plan_file(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("Plan file does not exist: {}", path.display());
    }
    if !path.is_file() {
        bail!("Not a file: {}", path.display());
    }
    fs::read_to_string(path).with_context(|| format!("read plan file {}", path.display()))
}

/// Write an improved plan to `path`, creating parent directories.
pub fn write_plan(path: &Path, plan: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut buf = plan.to_string();
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
