//! Build context - how a CI job talks to the merge train
//!
//! A CI job hands the train its inputs as environment variables and expects
//! progress messages on its console. Values a later job stage needs (the
//! branches still to push) are handed over through a `KEY=value` file, the
//! way CI systems inject properties into downstream steps.
//!
//! ```text
//! CI job ─ FEATURE_BRANCH, TARGET_BRANCH, ... ─▶ EnvContext::var
//!        ◀──────────── status lines ─────────── EnvContext::status
//!        ◀──── BRANCHES_TO_PUSH=r1336,r1338 ─── EnvContext::export
//! ```

use crate::core::error::{ResultExt, TrainResult};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

pub const FEATURE_BRANCH: &str = "FEATURE_BRANCH";
pub const TARGET_BRANCH: &str = "TARGET_BRANCH";
pub const COMMIT_USER_NAME: &str = "COMMIT_USER_NAME";
pub const APPROVED_REVISION: &str = "APPROVED_REVISION";
pub const REPO_URL: &str = "REPO_URL";
pub const REPO_SUBDIR: &str = "REPO_SUBDIR";
pub const BRANCHES_TO_PUSH: &str = "BRANCHES_TO_PUSH";

/// Inputs, status output and handoff for one run
pub trait BuildContext {
  /// A non-empty input value
  fn var(&self, key: &str) -> Option<String>;

  /// Report progress to whoever watches the job
  fn status(&self, message: &str);

  /// Pass a computed value to a later stage
  fn export(&mut self, key: &str, value: &str) -> TrainResult<()>;
}

/// Environment-backed context
///
/// Explicit overrides (CLI flags) win over the process environment; empty
/// values count as unset.
#[derive(Debug, Default)]
pub struct EnvContext {
  overrides: BTreeMap<String, String>,
  handoff: Option<PathBuf>,
  quiet: bool,
}

impl EnvContext {
  pub fn new(handoff: Option<PathBuf>) -> Self {
    Self {
      overrides: BTreeMap::new(),
      handoff,
      quiet: false,
    }
  }

  /// Keep status lines off stdout (machine-readable output follows)
  pub fn quiet(mut self, quiet: bool) -> Self {
    self.quiet = quiet;
    self
  }

  /// Set `key` unless `value` is `None`
  pub fn set(&mut self, key: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
      self.overrides.insert(key.to_string(), value.to_string());
    }
  }
}

impl BuildContext for EnvContext {
  fn var(&self, key: &str) -> Option<String> {
    self
      .overrides
      .get(key)
      .cloned()
      .or_else(|| std::env::var(key).ok())
      .filter(|v| !v.is_empty())
  }

  fn status(&self, message: &str) {
    tracing::info!("{}", message);
    if !self.quiet {
      println!("   {}", message);
    }
  }

  fn export(&mut self, key: &str, value: &str) -> TrainResult<()> {
    tracing::debug!(key, value, "exporting to later stages");
    let Some(path) = &self.handoff else {
      println!("{}={}", key, value);
      return Ok(());
    };

    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(path)
      .with_context(|| format!("Failed to open handoff file {}", path.display()))?;
    writeln!(file, "{}={}", key, value).with_context(|| format!("Failed to write handoff file {}", path.display()))?;
    Ok(())
  }
}

/// In-memory context for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryContext {
  pub vars: BTreeMap<String, String>,
  pub messages: std::cell::RefCell<Vec<String>>,
  pub exports: BTreeMap<String, String>,
}

#[cfg(test)]
impl BuildContext for MemoryContext {
  fn var(&self, key: &str) -> Option<String> {
    self.vars.get(key).filter(|v| !v.is_empty()).cloned()
  }

  fn status(&self, message: &str) {
    self.messages.borrow_mut().push(message.to_string());
  }

  fn export(&mut self, key: &str, value: &str) -> TrainResult<()> {
    self.exports.insert(key.to_string(), value.to_string());
    Ok(())
  }
}
