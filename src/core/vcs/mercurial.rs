//! Mercurial backend driving the system `hg`
//!
//! Every command runs with `HGPLAIN=1` so output is stable across user
//! configurations and locales. Failures are classified from the combined
//! output: hg reports most problems as `abort: ...` lines with exit code 255,
//! while merges with unresolved files exit with 1.

use super::runner::{CommandOutput, CommandRunner, Invocation};
use super::{Branch, CommitOutcome, MergeOutcome, ScmBackend, ScmKind, SeedFile};
use crate::core::config::ScmSettings;
use crate::core::error::{ScmError, ScmResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// `name   rev:hash [(closed|inactive)]` as printed by `hg branches`
static BRANCH_LINE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(.*?)\s+(\d+):([0-9a-f]+)(?:\s+\((closed|inactive)\))?$").expect("static regex"));

/// Summary line hg prints when a merge leaves files unresolved
static UNRESOLVED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[1-9]\d* files unresolved").expect("static regex"));

/// Mercurial implementation of [`ScmBackend`]
pub struct MercurialBackend {
  runner: Arc<dyn CommandRunner>,
  work_dir: PathBuf,
  trunk: String,
  hg_exe: String,
  local_timeout: Duration,
  remote_timeout: Duration,
  /// Author for commits the backend makes on its own (merging heads)
  default_author: String,
}

impl MercurialBackend {
  pub fn new(runner: Arc<dyn CommandRunner>, work_dir: &Path, trunk: &str, settings: &ScmSettings) -> Self {
    Self {
      runner,
      work_dir: work_dir.to_path_buf(),
      trunk: trunk.to_string(),
      hg_exe: settings.hg_executable.clone(),
      local_timeout: settings.local_timeout(),
      remote_timeout: settings.remote_timeout(),
      default_author: settings.default_author.clone(),
    }
  }

  /// Create an hg invocation with a stable environment
  ///
  /// - `HGPLAIN` disables aliases, localization and user output tweaks
  /// - `--noninteractive` answers prompts with their defaults
  fn hg(&self, timeout: Duration) -> Invocation {
    Invocation::new(&self.hg_exe, &self.work_dir, timeout)
      .env("HGPLAIN", "1")
      .env("HGENCODING", "utf-8")
      .arg("--noninteractive")
  }

  /// Run and accept only the listed exit codes; anything else is an operation error
  fn run_accepting(&self, invocation: Invocation, accepted: &[i32]) -> ScmResult<CommandOutput> {
    let out = self.runner.run(&invocation)?;
    if !accepted.contains(&out.exit_code) {
      return Err(classify_abort(&invocation, &out));
    }
    Ok(out)
  }

  /// Head node ids of `branch`, newest first
  pub fn heads(&self, branch: &str) -> ScmResult<Vec<String>> {
    let inv = self
      .hg(self.local_timeout)
      .args(["heads", branch, "--template", "{node}\\n"]);
    // exit 1: no open heads on the branch
    let out = self.run_accepting(inv, &[0, 1])?;
    Ok(
      out
        .output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect(),
    )
  }

  /// Local revision numbers that are not on the default remote
  pub fn outgoing_revisions(&self) -> ScmResult<Vec<String>> {
    let inv = self.hg(self.remote_timeout).args(["outgoing", "-q", "--template", "{rev}:"]);
    // exit 1: no outgoing changes
    let out = self.run_accepting(inv, &[0, 1])?;
    if out.exit_code == 1 {
      return Ok(Vec::new());
    }
    Ok(
      out
        .output
        .trim()
        .split(':')
        .filter(|rev| !rev.is_empty() && rev.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
        .collect(),
    )
  }

  /// Merge every extra head of `branch` into the working copy's head and commit
  ///
  /// Concurrent pushes can leave a release branch with several heads; an
  /// upmerge onto such a branch would otherwise merge into an arbitrary one.
  pub fn merge_heads(&self, branch: &str) -> ScmResult<usize> {
    let heads = self.heads(branch)?;
    if heads.len() < 2 {
      return Ok(0);
    }

    let parent = self.working_parent()?;
    let mut merged = 0;
    for head in heads.iter().filter(|h| **h != parent) {
      tracing::info!(branch, head = %head, "merging extra head");
      match self.merge_rev(head, branch)? {
        MergeOutcome::Merged => {
          self.commit(&format!("Merged heads on {}", branch), &self.default_author)?;
          merged += 1;
        }
        MergeOutcome::NoOp => {}
      }
    }
    Ok(merged)
  }

  fn working_parent(&self) -> ScmResult<String> {
    let inv = self.hg(self.local_timeout).args(["log", "-r", ".", "--template", "{node}"]);
    let out = self.run_accepting(inv, &[0])?;
    Ok(out.output.trim().to_string())
  }

  /// `hg merge` with conflicts and no-ops classified
  fn merge_rev(&self, rev: &str, target: &str) -> ScmResult<MergeOutcome> {
    let inv = self
      .hg(self.local_timeout)
      .args(["merge", "--tool", "internal:merge", rev]);
    let out = self.runner.run(&inv)?;

    if is_conflict(&out.output) {
      return Err(ScmError::MergeConflict {
        source_ref: rev.to_string(),
        target: target.to_string(),
        output: out.output,
      });
    }
    if is_no_op(&out.output) {
      return Err(ScmError::MergeNoOp {
        source_ref: rev.to_string(),
        output: out.output,
      });
    }
    if !out.success() || out.contains("abort:") {
      return Err(classify_abort(&inv, &out));
    }
    Ok(MergeOutcome::Merged)
  }

  fn update_with(&self, rev: &str, clean: bool) -> ScmResult<()> {
    let mut inv = self.hg(self.local_timeout).arg("update");
    if clean {
      inv = inv.arg("-C");
    }
    let inv = inv.arg(rev);
    let out = self.runner.run(&inv)?;
    if out.contains("abort:") || !out.success() {
      return Err(classify_abort(&inv, &out));
    }
    Ok(())
  }
}

impl ScmBackend for MercurialBackend {
  fn kind(&self) -> ScmKind {
    ScmKind::Hg
  }

  fn work_dir(&self) -> &Path {
    &self.work_dir
  }

  fn trunk(&self) -> &str {
    &self.trunk
  }

  fn list_branches(&self, include_closed: bool) -> ScmResult<Vec<Branch>> {
    let mut inv = self.hg(self.local_timeout).arg("branches");
    if include_closed {
      inv = inv.arg("-c");
    }
    let out = self.run_accepting(inv, &[0])?;
    Ok(parse_branches(&out.output))
  }

  fn current_branch(&self) -> ScmResult<String> {
    let out = self.run_accepting(self.hg(self.local_timeout).arg("branch"), &[0])?;
    Ok(out.output.trim().to_string())
  }

  fn update(&self, rev: &str) -> ScmResult<()> {
    self.update_with(rev, false)
  }

  fn update_clean(&self, rev: &str) -> ScmResult<()> {
    self.update_with(rev, true)
  }

  fn strip_local_only_commits(&self) -> ScmResult<()> {
    let revs = self.outgoing_revisions()?;
    if revs.is_empty() {
      return Ok(());
    }

    tracing::info!(count = revs.len(), "stripping local-only commits");
    let inv = self
      .hg(self.local_timeout)
      .args(["--config", "extensions.strip=", "strip"])
      .args(revs);
    let out = self.run_accepting(inv.clone(), &[0])?;
    if out.contains("abort:") {
      return Err(classify_abort(&inv, &out));
    }
    Ok(())
  }

  fn clean(&self) -> ScmResult<()> {
    let inv = self
      .hg(self.local_timeout)
      .args(["--config", "extensions.purge=", "purge", "--all"]);
    self.run_accepting(inv, &[0])?;
    Ok(())
  }

  fn commit(&self, message: &str, author: &str) -> ScmResult<CommitOutcome> {
    let inv = self
      .hg(self.local_timeout)
      .args(["--config", &format!("ui.username={}", author), "commit", "-m", message]);
    let out = self.run_accepting(inv.clone(), &[0, 1])?;
    if out.contains("abort:") {
      return Err(classify_abort(&inv, &out));
    }
    if out.exit_code == 1 || out.contains("nothing changed") {
      return Ok(CommitOutcome::NothingToCommit);
    }
    Ok(CommitOutcome::Committed)
  }

  fn close_branch(&self, name: &str, message: &str, author: &str) -> ScmResult<bool> {
    self.update_clean(name)?;
    let inv = self.hg(self.local_timeout).args([
      "--config",
      &format!("ui.username={}", author),
      "commit",
      "--close-branch",
      "-m",
      message,
    ]);
    let out = self.run_accepting(inv.clone(), &[0])?;
    if out.contains("abort:") {
      return Err(classify_abort(&inv, &out));
    }
    Ok(true)
  }

  fn merge_into(&self, source: &str, target: Option<&str>) -> ScmResult<MergeOutcome> {
    let target_name = match target {
      Some(target) => {
        self.update(target)?;
        self.merge_heads(target)?;
        target.to_string()
      }
      None => self.current_branch()?,
    };
    self.merge_rev(source, &target_name)
  }

  fn push(&self, branches: &[String]) -> ScmResult<String> {
    if branches.is_empty() {
      return Ok(String::new());
    }

    let mut inv = self.hg(self.remote_timeout).args(["push", "--new-branch"]);
    for branch in branches {
      inv = inv.args(["-b", branch.as_str()]);
    }
    let out = self.runner.run(&inv)?;

    if out.contains("push creates new remote head") {
      return Err(ScmError::NewRemoteHead { output: out.output });
    }
    // exit 1: nothing to push
    if out.contains("abort:") || !(out.exit_code == 0 || out.exit_code == 1) {
      return Err(classify_abort(&inv, &out));
    }
    Ok(out.output)
  }

  fn pull(&self, remote: Option<&str>, branch: Option<&str>) -> ScmResult<String> {
    let mut inv = self.hg(self.remote_timeout).arg("pull");
    if let Some(remote) = remote {
      inv = inv.arg(remote);
    }
    if let Some(branch) = branch {
      inv = inv.args(["-b", branch]);
    }
    let out = self.runner.run(&inv)?;
    if out.contains("abort:") || !out.success() {
      return Err(classify_abort(&inv, &out));
    }
    Ok(out.output)
  }

  fn create_release_branch(&self, name: &str, seed: Option<&SeedFile>, message: &str, author: &str) -> ScmResult<()> {
    self.update_clean(&self.trunk)?;
    self.run_accepting(self.hg(self.local_timeout).args(["branch", name]), &[0])?;

    if let Some(seed) = seed {
      let written = seed.write_into(&self.work_dir)?;
      let inv = self
        .hg(self.local_timeout)
        .args(["add", written.to_string_lossy().as_ref()]);
      self.run_accepting(inv, &[0])?;
    }

    self.commit(message, author)?;
    Ok(())
  }
}

/// Parse `hg branches` output, skipping lines that don't look like branches
fn parse_branches(output: &str) -> Vec<Branch> {
  output
    .lines()
    .filter_map(|line| {
      let caps = BRANCH_LINE.captures(line.trim_end())?;
      Some(Branch {
        name: caps[1].trim().to_string(),
        revision: caps[2].parse().ok(),
        hash: Some(caps[3].to_string()),
        closed: caps.get(4).is_some_and(|m| m.as_str() == "closed"),
      })
    })
    .collect()
}

fn is_conflict(output: &str) -> bool {
  output.contains("conflicts during merge")
    || UNRESOLVED.is_match(output)
    || (output.contains("merging ") && output.contains(" failed!"))
}

fn is_no_op(output: &str) -> bool {
  (output.contains("abort: merging") && output.contains("has no effect")) || output.contains("nothing to merge")
}

/// Turn an `abort:` (or unexpected exit code) into a typed error
fn classify_abort(invocation: &Invocation, out: &CommandOutput) -> ScmError {
  if out.contains("abort: unknown revision") || out.contains("abort: unknown branch") {
    return ScmError::UnknownRevision {
      revision: invocation.args.last().cloned().unwrap_or_default(),
      output: out.output.clone(),
    };
  }
  ScmError::operation(invocation.to_string(), out.output.clone())
}
