//! The merge train: gatekeeper merge, close, upmerge, push
//!
//! # State machine
//!
//! ```text
//! Idle ─▶ Prepared ─▶ Merged ─▶ Closed ─▶ Upmerging ─┬─▶ Pushed
//!   │                                                   └─▶ HandedOff
//!   └──────────┴─────────┴─────────┴───────────┴──▶ Failed(stage)
//! ```
//!
//! - **Prepared**: local leftovers stripped, remote pulled, target release
//!   branch exists (created from trunk when missing)
//! - **Merged**: feature (or its approved revision) merged into the target
//! - **Closed**: feature branch closed where the backend supports it
//! - **Upmerging**: each release after the target merged into the next one,
//!   ending at trunk
//! - **Pushed**: every touched branch published
//! - **HandedOff**: deferred runs only; the branch list was exported for a
//!   later `push`
//!
//! A merge that has no effect is a successful step without a commit. A merge
//! conflict aborts before anything is pushed. Every other failure aborts with
//! the backend's diagnostic and the stage it happened in.

use crate::core::config::{CommitSettings, TrainConfig};
use crate::core::context::{self, BuildContext};
use crate::core::error::{ConfigError, ScmError, Stage, TrainError, TrainResult};
use crate::core::plan::{MergePlan, Operation};
use crate::core::sequencer::{ReleaseId, Sequencer};
use crate::core::template::{self, Vars};
use crate::core::vcs::{MergeOutcome, ScmBackend, SeedFile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// What to merge where, and on whose behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
  pub feature: String,
  /// Release branch name; empty or trunk name means trunk
  pub target: String,
  /// Exact revision that was approved; the feature head when unset
  pub approved_revision: Option<String>,
  /// Where to pull the feature from; the default remote when unset
  pub feature_repo: Option<String>,
  pub author: String,
}

impl MergeRequest {
  /// Read the request from the build context
  ///
  /// `FEATURE_BRANCH` is required; the target defaults to trunk and the
  /// author to `default_author`.
  pub fn from_context(ctx: &dyn BuildContext, default_author: &str) -> TrainResult<Self> {
    let feature = ctx.var(context::FEATURE_BRANCH).ok_or_else(|| ConfigError::MissingField {
      field: context::FEATURE_BRANCH.to_string(),
    })?;

    Ok(Self {
      feature,
      target: ctx.var(context::TARGET_BRANCH).unwrap_or_default(),
      approved_revision: ctx.var(context::APPROVED_REVISION),
      feature_repo: ctx.var(context::REPO_URL),
      author: ctx
        .var(context::COMMIT_USER_NAME)
        .unwrap_or_else(|| default_author.to_string()),
    })
  }

  /// The ref actually merged in the gatekeeper step
  pub fn merge_source(&self) -> &str {
    self.approved_revision.as_deref().unwrap_or(&self.feature)
  }
}

/// Whether the run publishes its branches itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
  Immediate,
  /// Export `BRANCHES_TO_PUSH` for a later stage instead
  Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum TrainState {
  Idle,
  Prepared,
  Merged,
  Closed,
  Upmerging,
  Pushed,
  HandedOff,
  Failed(Stage),
}

/// One merge the train performed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeStep {
  pub source: String,
  pub target: String,
  pub outcome: MergeOutcome,
}

/// What a run did
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
  pub feature: String,
  pub target: String,
  pub state: TrainState,
  pub created_release_branch: bool,
  pub merges: Vec<MergeStep>,
  pub closed_feature: bool,
  pub branches_to_push: Vec<String>,
  pub pushed: bool,
  pub started_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
}

impl TrainReport {
  fn new(request: &MergeRequest, target: &str) -> Self {
    Self {
      feature: request.feature.clone(),
      target: target.to_string(),
      state: TrainState::Idle,
      created_release_branch: false,
      merges: Vec::new(),
      closed_feature: false,
      branches_to_push: Vec::new(),
      pushed: false,
      started_at: Utc::now(),
      finished_at: None,
    }
  }

  fn queue_push(&mut self, branch: &str) {
    push_unique(&mut self.branches_to_push, branch);
  }

  /// Human summary in the CLI's register
  pub fn to_human_readable(&self) -> String {
    let mut output = String::new();
    output.push_str(&format!("🚂 Merge train for {} → {}\n", self.feature, self.target));
    for step in &self.merges {
      let marker = match step.outcome {
        MergeOutcome::Merged => "🔀",
        MergeOutcome::NoOp => "⏭️ ",
      };
      output.push_str(&format!("   {} {} → {}\n", marker, step.source, step.target));
    }
    if self.closed_feature {
      output.push_str(&format!("   🔒 Closed {}\n", self.feature));
    }
    if self.pushed {
      output.push_str(&format!("   🚀 Pushed {}\n", self.branches_to_push.join(", ")));
    } else if !self.branches_to_push.is_empty() {
      output.push_str(&format!(
        "   📦 To push later: {}\n",
        self.branches_to_push.join(", ")
      ));
    }
    output
  }
}

/// Drives one backend through a merge train run
pub struct MergeTrain<'a> {
  backend: &'a dyn ScmBackend,
  sequencer: Sequencer,
  commit: CommitSettings,
  seed: Option<(PathBuf, String)>,
  state: TrainState,
}

impl<'a> MergeTrain<'a> {
  pub fn new(backend: &'a dyn ScmBackend, config: &TrainConfig) -> Self {
    let seed = match (&config.release.seed_file, &config.release.seed_template) {
      (Some(path), Some(template)) => Some((path.clone(), template.clone())),
      _ => None,
    };
    Self {
      backend,
      sequencer: Sequencer::new(backend.trunk(), config.release.label_format.clone()),
      commit: config.commit.clone(),
      seed,
      state: TrainState::Idle,
    }
  }

  pub fn state(&self) -> TrainState {
    self.state
  }

  pub fn sequencer(&self) -> &Sequencer {
    &self.sequencer
  }

  /// Run the whole train
  pub fn run(
    &mut self,
    request: &MergeRequest,
    ctx: &mut dyn BuildContext,
    mode: PushMode,
  ) -> TrainResult<TrainReport> {
    let target = self.sequencer.parse(&request.target)?;
    let target_name = self.sequencer.name_of(target);
    let mut report = TrainReport::new(request, &target_name);

    tracing::info!(feature = %request.feature, target = %target_name, "starting merge train");

    self.stage(Stage::Prepare, |train| train.prepare(request, target, &mut report, &*ctx))?;
    self.state = TrainState::Prepared;
    report.state = self.state;

    self.stage(Stage::Merge, |train| train.merge(request, &target_name, &mut report, &*ctx))?;
    self.state = TrainState::Merged;
    report.state = self.state;

    self.stage(Stage::Close, |train| train.close(request, &target_name, &mut report, &*ctx))?;
    self.state = TrainState::Closed;
    report.state = self.state;

    self.state = TrainState::Upmerging;
    self.stage(Stage::Upmerge, |train| train.upmerge(target, &request.author, &mut report, &*ctx))?;
    report.state = self.state;

    self.stage(Stage::Push, |train| train.push(request, &mut report, ctx, mode))?;
    report.state = self.state;
    report.finished_at = Some(Utc::now());

    tracing::info!(state = ?self.state, merges = report.merges.len(), "merge train finished");
    Ok(report)
  }

  /// Run one stage, tagging backend failures with it
  fn stage<F>(&mut self, stage: Stage, f: F) -> TrainResult<()>
  where
    F: FnOnce(&mut Self) -> TrainResult<()>,
  {
    tracing::info!(stage = %stage, "entering stage");
    f(self).map_err(|err| {
      self.state = TrainState::Failed(stage);
      let err = match err {
        TrainError::Scm(source) => TrainError::step(stage, source),
        other => other,
      };
      if err.is_conflict() {
        tracing::error!(stage = %stage, "merge conflict, aborting without push");
      } else {
        tracing::error!(stage = %stage, error = %err, "stage failed");
      }
      err
    })
  }

  fn prepare(
    &mut self,
    request: &MergeRequest,
    target: ReleaseId,
    report: &mut TrainReport,
    ctx: &dyn BuildContext,
  ) -> TrainResult<()> {
    self.backend.strip_local_only_commits()?;
    self.backend.pull(None, None)?;

    if target.is_trunk() {
      return Ok(());
    }

    let name = self.sequencer.name_of(target);
    let existing = self.backend.branch_names(true)?;
    if existing.iter().any(|b| *b == name) {
      return Ok(());
    }

    let label = self.sequencer.release_label(target);
    let seed = self.seed_file(&name, &label)?;
    let message = self.commit.message(&format!("{} release", label));
    ctx.status(&format!("🌱 Creating release branch {} from {}", name, self.backend.trunk()));
    self
      .backend
      .create_release_branch(&name, seed.as_ref(), &message, &request.author)?;
    report.created_release_branch = true;
    Ok(())
  }

  fn merge(
    &mut self,
    request: &MergeRequest,
    target: &str,
    report: &mut TrainReport,
    ctx: &dyn BuildContext,
  ) -> TrainResult<()> {
    self.backend.pull(request.feature_repo.as_deref(), Some(&request.feature))?;
    self.backend.update_clean(target)?;

    let source = request.merge_source();
    let message = self.commit.message(&format!("Merged {} into {}", request.feature, target));
    let outcome = self.merge_and_commit(source, target, &message, &request.author)?;
    match outcome {
      MergeOutcome::Merged => ctx.status(&format!("🔀 Merged {} into {}", request.feature, target)),
      MergeOutcome::NoOp => ctx.status(&format!("⏭️  {} already contains {}", target, request.feature)),
    }

    report.merges.push(MergeStep {
      source: request.feature.clone(),
      target: target.to_string(),
      outcome,
    });
    report.queue_push(target);
    Ok(())
  }

  fn close(
    &mut self,
    request: &MergeRequest,
    target: &str,
    report: &mut TrainReport,
    ctx: &dyn BuildContext,
  ) -> TrainResult<()> {
    let open = self.backend.branch_names(false)?;
    if !open.iter().any(|b| *b == request.feature) {
      tracing::debug!(feature = %request.feature, "feature branch not open, nothing to close");
      return Ok(());
    }

    let message = self.commit.message(&format!("Closing feature branch {}", request.feature));
    if self.backend.close_branch(&request.feature, &message, &request.author)? {
      ctx.status(&format!("🔒 Closed feature branch {}", request.feature));
      report.closed_feature = true;
      self.backend.update_clean(target)?;
    }
    Ok(())
  }

  fn upmerge(
    &mut self,
    from: ReleaseId,
    author: &str,
    report: &mut TrainReport,
    ctx: &dyn BuildContext,
  ) -> TrainResult<()> {
    let branches = self.backend.branch_names(false)?;
    let mut current = from;

    loop {
      let next = self.sequencer.next_existing(current, &branches);
      if next == current {
        break;
      }

      let source = self.sequencer.name_of(current);
      let target = self.sequencer.name_of(next);
      let message = self.commit.message(&format!("Merged {} into {}", source, target));
      self.backend.update_clean(&target)?;
      let outcome = self.merge_and_commit(&source, &target, &message, author)?;
      if outcome == MergeOutcome::Merged {
        ctx.status(&format!("🔀 Upmerged {} into {}", source, target));
      }

      report.merges.push(MergeStep {
        source,
        target: target.clone(),
        outcome,
      });
      report.queue_push(&target);
      current = next;
    }
    Ok(())
  }

  fn push(
    &mut self,
    request: &MergeRequest,
    report: &mut TrainReport,
    ctx: &mut dyn BuildContext,
    mode: PushMode,
  ) -> TrainResult<()> {
    // The feature branch carries the close commit, and hg refuses to push
    // a closed head on its own branch implicitly
    let all = self.backend.branch_names(true)?;
    if all.iter().any(|b| *b == request.feature) {
      report.queue_push(&request.feature);
    }

    match mode {
      PushMode::Immediate => {
        self.backend.push(&report.branches_to_push)?;
        report.pushed = true;
        self.state = TrainState::Pushed;
        ctx.status(&format!("🚀 Pushed {}", report.branches_to_push.join(", ")));
      }
      PushMode::Deferred => {
        ctx.export(context::BRANCHES_TO_PUSH, &report.branches_to_push.join(","))?;
        self.state = TrainState::HandedOff;
        ctx.status(&format!(
          "📦 Deferred push of {}",
          report.branches_to_push.join(", ")
        ));
      }
    }
    Ok(())
  }

  /// Merge and commit, treating "nothing to merge" as a finished step
  fn merge_and_commit(&self, source: &str, target: &str, message: &str, author: &str) -> TrainResult<MergeOutcome> {
    match self.backend.merge_into(source, Some(target)) {
      Ok(MergeOutcome::Merged) => {
        self.backend.commit(message, author)?;
        Ok(MergeOutcome::Merged)
      }
      Ok(MergeOutcome::NoOp) => Ok(MergeOutcome::NoOp),
      Err(ScmError::MergeNoOp { .. }) => {
        tracing::info!(source, target, "merge has no effect, skipping commit");
        Ok(MergeOutcome::NoOp)
      }
      Err(err) => Err(err.into()),
    }
  }

  fn seed_file(&self, branch: &str, label: &str) -> TrainResult<Option<SeedFile>> {
    let Some((path, template_text)) = &self.seed else {
      return Ok(None);
    };
    let mut vars = Vars::new();
    vars.insert("release".to_string(), label.to_string());
    vars.insert("branch".to_string(), branch.to_string());
    Ok(Some(SeedFile {
      path: path.clone(),
      contents: template::render(template_text, &vars)?,
    }))
  }

  /// Describe a run without changing the repository
  ///
  /// Uses the branch list the repository has right now; releases created on
  /// the remote since the last pull are not visible.
  pub fn plan(&self, request: &MergeRequest, mode: PushMode) -> TrainResult<MergePlan> {
    let target = self.sequencer.parse(&request.target)?;
    let target_name = self.sequencer.name_of(target);
    let all = self.backend.branch_names(true)?;
    let open = self.backend.branch_names(false)?;

    let mut plan = MergePlan::new(&request.feature, &target_name);
    let mut to_push: Vec<String> = Vec::new();

    plan.add_operation(Operation::StripLocal);
    plan.add_operation(Operation::Pull {
      remote: None,
      branch: None,
    });
    if !target.is_trunk() && !all.contains(&target_name) {
      plan.add_operation(Operation::CreateReleaseBranch {
        name: target_name.clone(),
        from: self.backend.trunk().to_string(),
        seed_file: self.seed.as_ref().map(|(p, _)| p.display().to_string()),
      });
    }

    plan.add_operation(Operation::Pull {
      remote: request.feature_repo.clone(),
      branch: Some(request.feature.clone()),
    });
    plan.add_operation(Operation::UpdateClean {
      branch: target_name.clone(),
    });
    plan.add_operation(Operation::Merge {
      from: request.merge_source().to_string(),
      into: target_name.clone(),
    });
    plan.add_operation(Operation::Commit {
      branch: target_name.clone(),
      message: self
        .commit
        .message(&format!("Merged {} into {}", request.feature, target_name)),
    });
    push_unique(&mut to_push, &target_name);

    if open.contains(&request.feature) {
      plan.add_operation(Operation::CloseBranch {
        name: request.feature.clone(),
      });
      plan.add_operation(Operation::UpdateClean {
        branch: target_name.clone(),
      });
    }

    for (from, to) in self.sequencer.upmerge_chain(target, &open) {
      let from = self.sequencer.name_of(from);
      let to = self.sequencer.name_of(to);
      plan.add_operation(Operation::Merge {
        from: from.clone(),
        into: to.clone(),
      });
      plan.add_operation(Operation::Commit {
        branch: to.clone(),
        message: self.commit.message(&format!("Merged {} into {}", from, to)),
      });
      push_unique(&mut to_push, &to);
    }

    if all.contains(&request.feature) {
      push_unique(&mut to_push, &request.feature);
    }
    match mode {
      PushMode::Immediate => plan.add_operation(Operation::Push { branches: to_push }),
      PushMode::Deferred => plan.add_operation(Operation::Export {
        key: context::BRANCHES_TO_PUSH.to_string(),
        value: to_push.join(","),
      }),
    }

    let summary = format!(
      "   Backend: {} ({})\n   Trunk: {}",
      self.backend.kind(),
      self.backend.work_dir().display(),
      self.backend.trunk()
    );
    Ok(plan.with_summary(summary))
  }
}

fn push_unique(list: &mut Vec<String>, branch: &str) {
  if !list.iter().any(|b| b == branch) {
    list.push(branch.to_string());
  }
}
