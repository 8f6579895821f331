//! Git backend driving the system `git`
//!
//! Git has no closed branches and no named-branch heads, so a few operations
//! are shaped differently from Mercurial:
//!
//! - branches are the `origin` remote-tracking refs (what the team sees)
//! - `update` creates a tracking branch when the branch only exists remotely
//! - `close_branch` does nothing
//! - the feature ref is fetched through a dedicated `feature` remote
//! - `push` only publishes branches that exist locally

use super::runner::{CommandOutput, CommandRunner, Invocation};
use super::{Branch, CommitOutcome, MergeOutcome, ScmBackend, ScmKind, SeedFile};
use crate::core::config::ScmSettings;
use crate::core::error::{ScmError, ScmResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Remote holding the shared release branches
const ORIGIN: &str = "origin";

/// Remote the feature branch is fetched through
const FEATURE_REMOTE: &str = "feature";

/// `Name <email>`
static AUTHOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(.*?)\s*<([^>]*)>\s*$").expect("static regex"));

/// Git implementation of [`ScmBackend`]
pub struct GitBackend {
  runner: Arc<dyn CommandRunner>,
  work_dir: PathBuf,
  trunk: String,
  git_exe: String,
  local_timeout: Duration,
  remote_timeout: Duration,
  default_identity: (String, String),
}

impl GitBackend {
  pub fn new(runner: Arc<dyn CommandRunner>, work_dir: &Path, trunk: &str, settings: &ScmSettings) -> Self {
    Self {
      runner,
      work_dir: work_dir.to_path_buf(),
      trunk: trunk.to_string(),
      git_exe: settings.git_executable.clone(),
      local_timeout: settings.local_timeout(),
      remote_timeout: settings.remote_timeout(),
      default_identity: split_author(&settings.default_author),
    }
  }

  /// Create a git invocation with isolated configuration
  ///
  /// - Sets working directory to the repo path
  /// - Forces the C locale so output can be matched
  /// - Adds safe configuration overrides and a fallback identity
  fn git(&self, timeout: Duration) -> Invocation {
    let (name, email) = &self.default_identity;
    Invocation::new(&self.git_exe, &self.work_dir, timeout)
      .env("LC_ALL", "C")
      .env("GIT_TERMINAL_PROMPT", "0")
      .arg("-C")
      .arg(self.work_dir.to_string_lossy())
      .args(["-c", "protocol.version=2"])
      .args(["-c", "advice.detachedHead=false"])
      .args(["-c", "core.quotePath=false"])
      .args(["-c".to_string(), format!("user.name={}", name)])
      .args(["-c".to_string(), format!("user.email={}", email)])
  }

  fn run_ok(&self, invocation: Invocation) -> ScmResult<CommandOutput> {
    let out = self.runner.run(&invocation)?;
    if !out.success() {
      return Err(classify_failure(&invocation, &out));
    }
    Ok(out)
  }

  /// Branches under `refs/heads`
  pub fn local_branches(&self) -> ScmResult<Vec<Branch>> {
    self.refs_under("refs/heads/")
  }

  /// Resolve a user-supplied ref to a commit id
  ///
  /// Tries the `feature` remote first (freshly fetched), then a local
  /// branch, then `origin`, then the raw revision.
  pub fn resolve_ref(&self, name: &str) -> ScmResult<String> {
    let candidates = [
      format!("refs/remotes/{}/{}", FEATURE_REMOTE, name),
      format!("refs/heads/{}", name),
      format!("refs/remotes/{}/{}", ORIGIN, name),
      name.to_string(),
    ];
    for candidate in &candidates {
      if let Some(sha) = self.rev_parse(candidate)? {
        tracing::debug!(name, resolved = %candidate, sha = %sha, "resolved ref");
        return Ok(sha);
      }
    }
    Err(ScmError::UnknownRevision {
      revision: name.to_string(),
      output: format!("'{}' is not a branch of {}, {} or a commit", name, FEATURE_REMOTE, ORIGIN),
    })
  }

  /// URL of a configured remote
  pub fn remote_url(&self, name: &str) -> ScmResult<String> {
    let out = self.run_ok(self.git(self.local_timeout).args(["remote", "get-url", name]))?;
    Ok(out.output.trim().to_string())
  }

  fn rev_parse(&self, rev: &str) -> ScmResult<Option<String>> {
    let inv = self
      .git(self.local_timeout)
      .args(["rev-parse", "--verify", "--quiet"])
      .arg(format!("{}^{{commit}}", rev));
    let out = self.runner.run(&inv)?;
    let sha = out.output.trim();
    Ok((out.success() && !sha.is_empty()).then(|| sha.to_string()))
  }

  fn refs_under(&self, prefix: &str) -> ScmResult<Vec<Branch>> {
    let inv = self
      .git(self.local_timeout)
      .args(["for-each-ref", "--format=%(refname) %(objectname)", prefix]);
    let out = self.run_ok(inv)?;
    Ok(parse_refs(&out.output, prefix))
  }

  fn is_local_branch(&self, name: &str) -> ScmResult<bool> {
    Ok(self.local_branches()?.iter().any(|b| b.name == name))
  }

  fn checkout(&self, args: &[&str]) -> ScmResult<()> {
    self.run_ok(self.git(self.local_timeout).arg("checkout").args(args.iter().copied()))?;
    Ok(())
  }
}

impl ScmBackend for GitBackend {
  fn kind(&self) -> ScmKind {
    ScmKind::Git
  }

  fn work_dir(&self) -> &Path {
    &self.work_dir
  }

  fn trunk(&self) -> &str {
    &self.trunk
  }

  /// Branches on `origin`; git has no closed branches so the flag is ignored
  fn list_branches(&self, _include_closed: bool) -> ScmResult<Vec<Branch>> {
    let prefix = format!("refs/remotes/{}/", ORIGIN);
    Ok(
      self
        .refs_under(&prefix)?
        .into_iter()
        .filter(|b| b.name != "HEAD")
        .collect(),
    )
  }

  fn current_branch(&self) -> ScmResult<String> {
    let out = self.run_ok(self.git(self.local_timeout).args(["rev-parse", "--abbrev-ref", "HEAD"]))?;
    Ok(out.output.trim().to_string())
  }

  fn update(&self, rev: &str) -> ScmResult<()> {
    if !rev.is_empty()
      && !self.is_local_branch(rev)?
      && self.rev_parse(&format!("refs/remotes/{}/{}", ORIGIN, rev))?.is_some()
    {
      let upstream = format!("{}/{}", ORIGIN, rev);
      return self.checkout(&["-b", rev, "--track", &upstream]);
    }
    self.checkout(&[rev])
  }

  fn update_clean(&self, rev: &str) -> ScmResult<()> {
    // Fails on an unborn HEAD, which has nothing to discard anyway
    let reset = self.git(self.local_timeout).args(["reset", "--hard", "--quiet"]);
    self.runner.run(&reset)?;
    self.update(rev)?;
    self.clean()
  }

  fn strip_local_only_commits(&self) -> ScmResult<()> {
    // Remote-tracking refs may predate a rejected push
    self.run_ok(self.git(self.remote_timeout).args(["fetch", ORIGIN, "--prune"]))?;
    let remote: Vec<Branch> = self.list_branches(false)?;
    let current = self.current_branch()?;

    for local in self.local_branches()? {
      let Some(upstream) = remote.iter().find(|b| b.name == local.name) else {
        continue;
      };
      if upstream.hash == local.hash {
        continue;
      }

      tracing::info!(branch = %local.name, "resetting branch to {}", ORIGIN);
      let target = format!("{}/{}", ORIGIN, local.name);
      let inv = if local.name == current {
        self.git(self.local_timeout).args(["reset", "--hard", target.as_str()])
      } else {
        self.git(self.local_timeout).args(["branch", "-f", local.name.as_str(), target.as_str()])
      };
      self.run_ok(inv)?;
    }
    self.clean()
  }

  fn clean(&self) -> ScmResult<()> {
    self.run_ok(self.git(self.local_timeout).args(["clean", "-fdx", "--quiet"]))?;
    Ok(())
  }

  fn commit(&self, message: &str, author: &str) -> ScmResult<CommitOutcome> {
    let (name, email) = split_author(author);
    let inv = self
      .git(self.local_timeout)
      .args(["-c".to_string(), format!("user.name={}", name)])
      .args(["-c".to_string(), format!("user.email={}", email)])
      .args(["commit", "-m", message]);
    let out = self.runner.run(&inv)?;

    if out.contains("nothing to commit") || out.contains("nothing added to commit") {
      return Ok(CommitOutcome::NothingToCommit);
    }
    if !out.success() {
      return Err(classify_failure(&inv, &out));
    }
    Ok(CommitOutcome::Committed)
  }

  fn close_branch(&self, name: &str, _message: &str, _author: &str) -> ScmResult<bool> {
    tracing::debug!(branch = name, "git has no closed branches, leaving branch as is");
    Ok(false)
  }

  fn merge_into(&self, source: &str, target: Option<&str>) -> ScmResult<MergeOutcome> {
    let target_name = match target {
      Some(target) => {
        self.update_clean(target)?;
        target.to_string()
      }
      None => self.current_branch()?,
    };

    let sha = self.resolve_ref(source)?;
    let inv = self
      .git(self.local_timeout)
      .args(["merge", "--no-commit", "--no-ff", sha.as_str()]);
    let out = self.runner.run(&inv)?;

    if out.contains("CONFLICT") || out.contains("Automatic merge failed") {
      return Err(ScmError::MergeConflict {
        source_ref: source.to_string(),
        target: target_name,
        output: out.output,
      });
    }
    if out.contains("Already up to date") || out.contains("Already up-to-date") {
      return Err(ScmError::MergeNoOp {
        source_ref: source.to_string(),
        output: out.output,
      });
    }
    if !out.success() {
      return Err(classify_failure(&inv, &out));
    }
    Ok(MergeOutcome::Merged)
  }

  fn push(&self, branches: &[String]) -> ScmResult<String> {
    let local: Vec<String> = self.local_branches()?.into_iter().map(|b| b.name).collect();
    let mut output = String::new();

    for branch in branches.iter().filter(|b| local.contains(b)) {
      let inv = self.git(self.remote_timeout).args(["push", ORIGIN, branch.as_str()]);
      let out = self.runner.run(&inv)?;
      if out.contains("[rejected]") || out.contains("non-fast-forward") || out.contains("fetch first") {
        return Err(ScmError::NewRemoteHead { output: out.output });
      }
      if !out.success() {
        return Err(classify_failure(&inv, &out));
      }
      output.push_str(&out.output);
    }

    Ok(output)
  }

  fn pull(&self, remote: Option<&str>, branch: Option<&str>) -> ScmResult<String> {
    let Some(branch) = branch else {
      let remote = remote.unwrap_or(ORIGIN);
      let out = self.run_ok(self.git(self.remote_timeout).args(["fetch", remote, "--prune"]))?;
      return Ok(out.output);
    };

    let url = match remote {
      Some(url) => url.to_string(),
      None => self.remote_url(ORIGIN)?,
    };

    // Re-pointing the feature remote drops refs of an earlier run
    self
      .runner
      .run(&self.git(self.local_timeout).args(["remote", "remove", FEATURE_REMOTE]))?;
    self.run_ok(
      self
        .git(self.local_timeout)
        .args(["remote", "add", FEATURE_REMOTE, url.as_str()]),
    )?;
    let out = self.run_ok(self.git(self.remote_timeout).args(["fetch", FEATURE_REMOTE, branch]))?;
    Ok(out.output)
  }

  fn create_release_branch(&self, name: &str, seed: Option<&SeedFile>, message: &str, author: &str) -> ScmResult<()> {
    self.update_clean(&self.trunk)?;
    self.checkout(&["-B", name])?;

    if let Some(seed) = seed {
      let written = seed.write_into(&self.work_dir)?;
      self.run_ok(
        self
          .git(self.local_timeout)
          .args(["add", "--"])
          .arg(written.to_string_lossy()),
      )?;
      self.commit(message, author)?;
    }
    Ok(())
  }
}

/// Split `Name <email>`; a bare name gets a local address
fn split_author(author: &str) -> (String, String) {
  match AUTHOR.captures(author) {
    Some(caps) => {
      let email = caps[2].to_string();
      let name = if caps[1].is_empty() { email.clone() } else { caps[1].to_string() };
      (name, email)
    }
    None => {
      let name = author.trim();
      let local = name.replace(char::is_whitespace, ".").to_ascii_lowercase();
      (name.to_string(), format!("{}@localhost", local))
    }
  }
}

/// Parse `for-each-ref` lines, stripping `prefix` from the ref name
fn parse_refs(output: &str, prefix: &str) -> Vec<Branch> {
  output
    .lines()
    .filter_map(|line| {
      let (refname, sha) = line.trim().split_once(' ')?;
      let name = refname.strip_prefix(prefix)?;
      Some(Branch {
        name: name.to_string(),
        revision: None,
        hash: Some(sha.to_string()),
        closed: false,
      })
    })
    .collect()
}

fn classify_failure(invocation: &Invocation, out: &CommandOutput) -> ScmError {
  let unknown = ["did not match any", "invalid reference", "unknown revision", "couldn't find remote ref"];
  if unknown.iter().any(|marker| out.contains(marker)) {
    return ScmError::UnknownRevision {
      revision: invocation.args.last().cloned().unwrap_or_default(),
      output: out.output.clone(),
    };
  }
  ScmError::operation(invocation.to_string(), out.output.clone())
}

#[cfg(test)]
mod tests {
  use super::super::runner::scripted::ScriptedRunner;
  use super::*;

  const REMOTE_REFS: &str = "\
refs/remotes/origin/HEAD 1111111111111111111111111111111111111111
refs/remotes/origin/c3 2222222222222222222222222222222222222222
refs/remotes/origin/master 3333333333333333333333333333333333333333
refs/remotes/origin/r1336 4444444444444444444444444444444444444444
";

  fn backend(runner: ScriptedRunner) -> (Arc<ScriptedRunner>, GitBackend) {
    let runner = Arc::new(runner);
    let backend = GitBackend::new(runner.clone(), Path::new("/repo"), "master", &ScmSettings::default());
    (runner, backend)
  }

  #[test]
  fn test_split_author() {
    assert_eq!(
      split_author("Alice Smith <alice@example.com>"),
      ("Alice Smith".to_string(), "alice@example.com".to_string())
    );
    assert_eq!(
      split_author("Jenkins CI"),
      ("Jenkins CI".to_string(), "jenkins.ci@localhost".to_string())
    );
  }

  #[test]
  fn test_list_branches_uses_origin_refs() {
    let (_, git) = backend(ScriptedRunner::new().on("refs/remotes/origin/", 0, REMOTE_REFS));
    let names = git.branch_names(true).unwrap();
    assert_eq!(names, vec!["c3", "master", "r1336"]);
  }

  #[test]
  fn test_update_creates_tracking_branch() {
    let (runner, git) = backend(
      ScriptedRunner::new()
        .on("refs/heads/", 0, "refs/heads/master 3333333333333333333333333333333333333333\n")
        .on("refs/remotes/origin/r1336^{commit}", 0, "4444444444444444444444444444444444444444\n"),
    );
    git.update("r1336").unwrap();
    assert!(runner.called("checkout -b r1336 --track origin/r1336"));
  }

  #[test]
  fn test_update_local_branch_checks_out() {
    let (runner, git) = backend(ScriptedRunner::new().on(
      "refs/heads/",
      0,
      "refs/heads/master 3333333333333333333333333333333333333333\n",
    ));
    git.update("master").unwrap();
    assert!(runner.calls().last().unwrap().ends_with("checkout master"));
  }

  #[test]
  fn test_update_unknown_revision() {
    let (_, git) = backend(
      ScriptedRunner::new()
        .on("^{commit}", 1, "")
        .on("checkout", 1, "error: pathspec 'r9999' did not match any file(s) known to git\n"),
    );
    let err = git.update("r9999").unwrap_err();
    assert!(matches!(err, ScmError::UnknownRevision { .. }));
  }

  #[test]
  fn test_resolve_ref_prefers_feature_remote() {
    let (runner, git) = backend(
      ScriptedRunner::new()
        .on("refs/remotes/feature/c3^{commit}", 0, "aaaa\n")
        .on("^{commit}", 0, "bbbb\n"),
    );
    assert_eq!(git.resolve_ref("c3").unwrap(), "aaaa");
    assert_eq!(runner.calls().len(), 1);
  }

  #[test]
  fn test_resolve_ref_falls_back_to_raw_revision() {
    let (_, git) = backend(
      ScriptedRunner::new()
        .on("refs/", 1, "")
        .on("deadbeef^{commit}", 0, "deadbeefdeadbeef\n"),
    );
    assert_eq!(git.resolve_ref("deadbeef").unwrap(), "deadbeefdeadbeef");
  }

  #[test]
  fn test_merge_conflict() {
    let (_, git) = backend(
      ScriptedRunner::new()
        .on("^{commit}", 0, "aaaa\n")
        .on(
          "merge --no-commit",
          1,
          "Auto-merging a.txt\nCONFLICT (content): Merge conflict in a.txt\nAutomatic merge failed; fix conflicts and then commit the result.\n",
        ),
    );
    let err = git.merge_into("c3", None).unwrap_err();
    assert!(err.is_conflict());
  }

  #[test]
  fn test_merge_already_up_to_date_is_no_op() {
    let (_, git) = backend(
      ScriptedRunner::new()
        .on("^{commit}", 0, "aaaa\n")
        .on("merge --no-commit", 0, "Already up to date.\n"),
    );
    assert!(git.merge_into("r1336", Some("r1338")).unwrap_err().is_no_op());
  }

  #[test]
  fn test_merge_into_updates_target_first() {
    let (runner, git) = backend(
      ScriptedRunner::new()
        .on("refs/heads/", 0, "refs/heads/r1338 5555555555555555555555555555555555555555\n")
        .on("^{commit}", 0, "aaaa\n")
        .on("merge --no-commit", 0, "Automatic merge went well; stopped before committing as requested\n"),
    );
    assert_eq!(git.merge_into("c3", Some("r1338")).unwrap(), MergeOutcome::Merged);
    let calls = runner.calls();
    let checkout = calls.iter().position(|c| c.ends_with("checkout r1338")).unwrap();
    let merge = calls.iter().position(|c| c.ends_with("merge --no-commit --no-ff aaaa")).unwrap();
    assert!(checkout < merge);
  }

  #[test]
  fn test_commit_uses_author_identity() {
    let (runner, git) = backend(ScriptedRunner::new());
    git.commit("Merged c3 into r1336", "Bob <bob@example.com>").unwrap();
    assert!(runner.called("-c user.name=Bob -c user.email=bob@example.com commit -m Merged c3 into r1336"));
  }

  #[test]
  fn test_commit_nothing_to_commit() {
    let (_, git) = backend(ScriptedRunner::new().on(
      "commit -m",
      1,
      "On branch r1336\nnothing to commit, working tree clean\n",
    ));
    assert_eq!(git.commit("msg", "bob").unwrap(), CommitOutcome::NothingToCommit);
  }

  #[test]
  fn test_close_branch_is_noop() {
    let (runner, git) = backend(ScriptedRunner::new());
    assert!(!git.close_branch("c3", "Closing c3", "bob").unwrap());
    assert!(runner.calls().is_empty());
  }

  #[test]
  fn test_push_only_local_branches() {
    let (runner, git) = backend(ScriptedRunner::new().on(
      "refs/heads/",
      0,
      "refs/heads/r1336 4444444444444444444444444444444444444444\nrefs/heads/master 3333333333333333333333333333333333333333\n",
    ));
    git
      .push(&["r1336".to_string(), "c3".to_string(), "master".to_string()])
      .unwrap();
    assert!(runner.called("push origin r1336"));
    assert!(runner.called("push origin master"));
    assert!(!runner.called("push origin c3"));
  }

  #[test]
  fn test_push_rejected_is_new_remote_head() {
    let (_, git) = backend(
      ScriptedRunner::new()
        .on("refs/heads/", 0, "refs/heads/r1336 4444444444444444444444444444444444444444\n")
        .on(
          "push origin",
          1,
          " ! [rejected]        r1336 -> r1336 (fetch first)\nerror: failed to push some refs\n",
        ),
    );
    let err = git.push(&["r1336".to_string()]).unwrap_err();
    assert!(matches!(err, ScmError::NewRemoteHead { .. }));
  }

  #[test]
  fn test_pull_feature_readds_remote() {
    let (runner, git) = backend(ScriptedRunner::new().on("remote remove", 2, "error: No such remote: 'feature'\n"));
    git.pull(Some("/srv/feature.git"), Some("c3")).unwrap();
    let calls = runner.calls();
    assert!(calls[0].ends_with("remote remove feature"));
    assert!(calls[1].ends_with("remote add feature /srv/feature.git"));
    assert!(calls[2].ends_with("fetch feature c3"));
  }

  #[test]
  fn test_pull_without_branch_fetches_origin() {
    let (runner, git) = backend(ScriptedRunner::new());
    git.pull(None, None).unwrap();
    assert!(runner.calls()[0].ends_with("fetch origin --prune"));
  }

  #[test]
  fn test_strip_resets_diverged_branches() {
    let (runner, git) = backend(
      ScriptedRunner::new()
        .on("refs/remotes/origin/", 0, REMOTE_REFS)
        .on(
          "refs/heads/",
          0,
          "refs/heads/master 9999999999999999999999999999999999999999\n\
           refs/heads/r1336 eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee\n\
           refs/heads/local-only ffffffffffffffffffffffffffffffffffffffff\n",
        )
        .on("--abbrev-ref", 0, "master\n"),
    );
    git.strip_local_only_commits().unwrap();
    assert!(runner.calls()[0].ends_with("fetch origin --prune"));
    assert!(runner.called("reset --hard origin/master"));
    assert!(runner.called("branch -f r1336 origin/r1336"));
    assert!(!runner.called("local-only origin/local-only"));
  }
}
