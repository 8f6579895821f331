//! Version-control backends behind one normalized operation set
//!
//! Both backends shell out to the system `hg`/`git` through a
//! [`CommandRunner`](runner::CommandRunner) and turn raw output into the typed
//! outcomes below or an [`ScmError`](crate::core::error::ScmError). Nothing
//! above this module inspects tool output.

pub mod git;
pub mod mercurial;
pub mod runner;

pub use git::GitBackend;
pub use mercurial::MercurialBackend;

use crate::core::error::{ScmError, ScmResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which version-control system a repository uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScmKind {
  #[serde(alias = "mercurial")]
  Hg,
  Git,
}

impl ScmKind {
  /// Trunk branch name when none is configured
  pub fn default_trunk(self) -> &'static str {
    match self {
      ScmKind::Hg => "default",
      ScmKind::Git => "master",
    }
  }

  /// Guess the kind from the metadata directory in `path`
  pub fn detect(path: &Path) -> Option<Self> {
    if path.join(".hg").is_dir() {
      Some(ScmKind::Hg)
    } else if path.join(".git").exists() {
      Some(ScmKind::Git)
    } else {
      None
    }
  }
}

impl fmt::Display for ScmKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ScmKind::Hg => write!(f, "hg"),
      ScmKind::Git => write!(f, "git"),
    }
  }
}

impl FromStr for ScmKind {
  type Err = ScmError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "hg" | "mercurial" => Ok(ScmKind::Hg),
      "git" => Ok(ScmKind::Git),
      other => Err(ScmError::NoMatchingBackend {
        reason: format!("unknown scm kind '{}' (expected 'hg' or 'git')", other),
      }),
    }
  }
}

/// A branch as reported by the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
  pub name: String,
  /// Local revision number (Mercurial only)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub revision: Option<u64>,
  /// Commit identifier of the branch head
  #[serde(skip_serializing_if = "Option::is_none")]
  pub hash: Option<String>,
  /// Closed branches only show up when listing with `include_closed`
  pub closed: bool,
}

impl Branch {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      revision: None,
      hash: None,
      closed: false,
    }
  }
}

/// Result of a merge that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
  /// Working copy holds an uncommitted merge
  Merged,
  /// Source was already contained in the target; nothing to commit
  NoOp,
}

/// Result of a commit that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
  Committed,
  NothingToCommit,
}

/// File written into a freshly created release branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedFile {
  /// Path relative to the working directory
  pub path: PathBuf,
  pub contents: String,
}

impl SeedFile {
  /// Write the file below `work_dir`, creating parent directories
  pub(crate) fn write_into(&self, work_dir: &Path) -> ScmResult<PathBuf> {
    let target = work_dir.join(&self.path);
    let io_err = |e: std::io::Error| ScmError::operation(format!("write {}", target.display()), e.to_string());
    if let Some(parent) = target.parent() {
      std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(&target, &self.contents).map_err(io_err)?;
    Ok(target)
  }
}

/// Operations the merge train needs from a version-control system
///
/// Implementations own one working directory for their whole lifetime.
/// Failures are always classified into [`ScmError`] variants here so callers
/// never have to look at tool output.
pub trait ScmBackend {
  fn kind(&self) -> ScmKind;

  fn work_dir(&self) -> &Path;

  /// Name of the trunk branch
  fn trunk(&self) -> &str;

  /// Branches known to the repository; closed ones only when asked
  fn list_branches(&self, include_closed: bool) -> ScmResult<Vec<Branch>>;

  fn branch_names(&self, include_closed: bool) -> ScmResult<Vec<String>> {
    Ok(self.list_branches(include_closed)?.into_iter().map(|b| b.name).collect())
  }

  fn current_branch(&self) -> ScmResult<String>;

  /// Switch the working copy to `rev`
  fn update(&self, rev: &str) -> ScmResult<()>;

  /// Discard uncommitted changes, then switch to `rev`
  fn update_clean(&self, rev: &str) -> ScmResult<()>;

  /// Drop commits that exist only in this clone (leftovers of an aborted run)
  fn strip_local_only_commits(&self) -> ScmResult<()>;

  /// Remove untracked and ignored files
  fn clean(&self) -> ScmResult<()>;

  fn commit(&self, message: &str, author: &str) -> ScmResult<CommitOutcome>;

  /// Mark a branch closed; returns false where the tool has no such concept
  fn close_branch(&self, name: &str, message: &str, author: &str) -> ScmResult<bool>;

  /// Merge `source` into the working copy, after switching to `target` when given
  ///
  /// Leaves the merge uncommitted on success.
  fn merge_into(&self, source: &str, target: Option<&str>) -> ScmResult<MergeOutcome>;

  /// Publish the given branches; returns the tool output
  fn push(&self, branches: &[String]) -> ScmResult<String>;

  /// Fetch from `remote` (the default remote when `None`), limited to `branch`
  fn pull(&self, remote: Option<&str>, branch: Option<&str>) -> ScmResult<String>;

  /// Create `name` from trunk, optionally seeding it with one committed file
  fn create_release_branch(&self, name: &str, seed: Option<&SeedFile>, message: &str, author: &str) -> ScmResult<()>;
}
