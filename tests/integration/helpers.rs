//! Test helpers for integration tests

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Releases every fixture starts with
pub const RELEASES: [&str; 3] = ["r1336", "r1338", "r1340"];

/// A shared remote, a clone used to seed it, and the clone the train runs in
pub struct GitFixture {
  _root: TempDir,
  pub origin: PathBuf,
  pub seed: PathBuf,
  pub work: PathBuf,
}

impl GitFixture {
  /// `master`, `r1336`, `r1338`, `r1340`, and feature `c3` branched off `r1336`
  pub fn new() -> Result<Self> {
    let root = TempDir::new()?;
    let origin = root.path().join("origin.git");
    let seed = root.path().join("seed");
    let work = root.path().join("work");

    git(root.path(), &["init", "--bare", "--initial-branch=master", "origin.git"])?;
    git(root.path(), &["init", "--initial-branch=master", "seed"])?;
    git(&seed, &["config", "user.name", "Test User"])?;
    git(&seed, &["config", "user.email", "test@example.com"])?;

    std::fs::write(seed.join("shared.txt"), "base\n")?;
    git(&seed, &["add", "."])?;
    git(&seed, &["commit", "-m", "Initial commit"])?;

    for release in RELEASES {
      git(&seed, &["checkout", "-b", release, "master"])?;
      std::fs::write(seed.join(format!("{}.txt", release)), release)?;
      git(&seed, &["add", "."])?;
      git(&seed, &["commit", "-m", &format!("Start {}", release)])?;
    }

    git(&seed, &["checkout", "-b", "c3", "r1336"])?;
    std::fs::write(seed.join("c3.txt"), "feature c3\n")?;
    git(&seed, &["add", "."])?;
    git(&seed, &["commit", "-m", "Implement c3"])?;

    git(&seed, &["remote", "add", "origin", &origin.display().to_string()])?;
    git(&seed, &["push", "origin", "--all"])?;
    git(root.path(), &["clone", &origin.display().to_string(), "work"])?;

    Ok(Self {
      _root: root,
      origin,
      seed,
      work,
    })
  }

  /// Commit `content` to `file` on `branch` and push it to the remote
  pub fn push_change(&self, branch: &str, file: &str, content: &str) -> Result<()> {
    git(&self.seed, &["checkout", branch])?;
    git(&self.seed, &["pull", "--ff-only", "origin", branch])?;
    std::fs::write(self.seed.join(file), content)?;
    git(&self.seed, &["add", "."])?;
    git(&self.seed, &["commit", "-m", &format!("Change {} on {}", file, branch)])?;
    git(&self.seed, &["push", "origin", branch])?;
    Ok(())
  }

  /// File contents on the remote branch, `None` when absent
  pub fn origin_file(&self, branch: &str, file: &str) -> Option<String> {
    read_blob(&self.origin, &format!("{}:{}", branch, file))
  }

  /// File contents on a local branch of the train's clone
  pub fn work_file(&self, branch: &str, file: &str) -> Option<String> {
    read_blob(&self.work, &format!("{}:{}", branch, file))
  }

  /// Commit subjects on a remote branch, newest first
  pub fn origin_log(&self, branch: &str) -> Result<Vec<String>> {
    let output = git(&self.origin, &["log", "--format=%s", branch])?;
    Ok(
      String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(String::from)
        .collect(),
    )
  }
}

fn read_blob(repo: &Path, spec: &str) -> Option<String> {
  let output = Command::new("git")
    .current_dir(repo)
    .args(["show", spec])
    .output()
    .ok()?;
  output
    .status
    .success()
    .then(|| String::from_utf8_lossy(&output.stdout).to_string())
}

/// Mercurial counterpart of [`GitFixture`]
pub struct HgFixture {
  _root: TempDir,
  pub origin: PathBuf,
  pub work: PathBuf,
}

impl HgFixture {
  pub fn new() -> Result<Self> {
    let root = TempDir::new()?;
    let origin = root.path().join("origin");
    let work = root.path().join("work");

    hg(root.path(), &["init", "origin"])?;
    std::fs::write(origin.join("shared.txt"), "base\n")?;
    hg(&origin, &["add", "shared.txt"])?;
    hg_commit(&origin, "Initial commit")?;

    for release in RELEASES {
      hg(&origin, &["update", "default"])?;
      hg(&origin, &["branch", release])?;
      let file = format!("{}.txt", release);
      std::fs::write(origin.join(&file), release)?;
      hg(&origin, &["add", &file])?;
      hg_commit(&origin, &format!("Start {}", release))?;
    }

    hg(&origin, &["update", "r1336"])?;
    hg(&origin, &["branch", "c3"])?;
    std::fs::write(origin.join("c3.txt"), "feature c3\n")?;
    hg(&origin, &["add", "c3.txt"])?;
    hg_commit(&origin, "Implement c3")?;
    hg(&origin, &["update", "null"])?;

    hg(root.path(), &["clone", "origin", "work"])?;

    Ok(Self {
      _root: root,
      origin,
      work,
    })
  }

  /// File contents at the head of `branch` in the remote
  pub fn origin_file(&self, branch: &str, file: &str) -> Option<String> {
    let output = Command::new("hg")
      .current_dir(&self.origin)
      .args(["cat", "-r", branch, file])
      .output()
      .ok()?;
    output
      .status
      .success()
      .then(|| String::from_utf8_lossy(&output.stdout).to_string())
  }

  /// Open branch names in the remote
  pub fn origin_open_branches(&self) -> Result<Vec<String>> {
    let output = hg(&self.origin, &["branches", "--template", "{branch}\n"])?;
    Ok(
      String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(String::from)
        .collect(),
    )
  }
}

/// True when a working `hg` is on PATH
pub fn hg_available() -> bool {
  Command::new("hg")
    .arg("--version")
    .output()
    .map(|o| o.status.success())
    .unwrap_or(false)
}

/// Run git command in a directory
pub fn git(cwd: &Path, args: &[&str]) -> Result<Output> {
  let output = Command::new("git")
    .current_dir(cwd)
    .args(args)
    .output()
    .context("Failed to run git command")?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow::bail!("Git command failed: git {}\n{}", args.join(" "), stderr);
  }

  Ok(output)
}

/// Run hg command in a directory
pub fn hg(cwd: &Path, args: &[&str]) -> Result<Output> {
  let output = Command::new("hg")
    .current_dir(cwd)
    .env("HGPLAIN", "1")
    .args(args)
    .output()
    .context("Failed to run hg command")?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow::bail!("Hg command failed: hg {}\n{}", args.join(" "), stderr);
  }

  Ok(output)
}

fn hg_commit(cwd: &Path, message: &str) -> Result<Output> {
  hg(cwd, &["--config", "ui.username=Test User <test@example.com>", "commit", "-m", message])
}

/// Run merge-train, returning the output whatever the exit status
pub fn merge_train(cwd: &Path, args: &[&str]) -> Result<Output> {
  let bin = env!("CARGO_BIN_EXE_merge-train");
  Command::new(bin)
    .current_dir(cwd)
    .args(args)
    .env_remove("FEATURE_BRANCH")
    .env_remove("TARGET_BRANCH")
    .env_remove("APPROVED_REVISION")
    .env_remove("REPO_URL")
    .env_remove("REPO_SUBDIR")
    .env_remove("BRANCHES_TO_PUSH")
    .env_remove("COMMIT_USER_NAME")
    .output()
    .context("Failed to run merge-train")
}

/// Run merge-train and fail unless it succeeds
pub fn run_merge_train(cwd: &Path, args: &[&str]) -> Result<Output> {
  let output = merge_train(cwd, args)?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    anyhow::bail!(
      "merge-train command failed: merge-train {}\nstdout: {}\nstderr: {}",
      args.join(" "),
      stdout,
      stderr
    );
  }

  Ok(output)
}
