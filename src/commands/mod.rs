//! CLI commands for merge-train
//!
//! - **run**: the full train (gatekeeper merge, close, upmerge, push)
//! - **plan**: print what `run` would do without touching the repository
//! - **push**: publish a branch list handed over by an earlier `run --no-push`
//! - **next**: print the next existing release after a branch
//! - **branches**: list branches as the backend sees them
//!
//! Every command starts from a [`Session`]: workspace, loaded configuration
//! and the repository subdir the job is about.

pub mod branches;
pub mod next;
pub mod plan;
pub mod push;
pub mod run;

pub use branches::run_branches;
pub use next::run_next;
pub use plan::run_plan;
pub use push::run_push;
pub use run::{RunArgs, run_train};

use crate::core::config::TrainConfig;
use crate::core::context::{self, BuildContext};
use crate::core::error::TrainResult;
use crate::core::factory;
use crate::core::vcs::runner::SystemRunner;
use crate::core::vcs::{ScmBackend, ScmKind};
use std::path::PathBuf;
use std::sync::Arc;

/// Flags shared by all commands
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
  pub workspace: Option<PathBuf>,
  pub config: Option<PathBuf>,
  pub scm: Option<ScmKind>,
  pub repo_subdir: Option<String>,
}

/// Workspace, configuration and repository hint for one invocation
#[derive(Debug)]
pub struct Session {
  pub workspace: PathBuf,
  pub config: TrainConfig,
  pub repo_subdir: Option<String>,
}

impl Session {
  /// Resolve the workspace and load its configuration
  ///
  /// `--repo-subdir` wins over `REPO_SUBDIR`; `--scm` replaces the configured
  /// repository list with a single repository of that kind.
  pub fn load(args: &GlobalArgs, ctx: &dyn BuildContext) -> TrainResult<Self> {
    let workspace = match &args.workspace {
      Some(dir) => dir.clone(),
      None => std::env::current_dir()?,
    };
    let mut config = TrainConfig::load(&workspace, args.config.as_deref())?;
    let repo_subdir = args.repo_subdir.clone().or_else(|| ctx.var(context::REPO_SUBDIR));

    if let Some(kind) = args.scm {
      config.override_kind(kind, repo_subdir.as_deref());
    }

    Ok(Self {
      workspace,
      config,
      repo_subdir,
    })
  }

  /// Build the backend for the selected repository
  pub fn backend(&self) -> TrainResult<Box<dyn ScmBackend>> {
    Ok(factory::select_backend(
      &self.config,
      self.repo_subdir.as_deref(),
      &self.workspace,
      Arc::new(SystemRunner::new(self.config.scm.pass_env.iter().cloned())),
    )?)
  }
}
