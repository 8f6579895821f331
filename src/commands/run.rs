use std::path::PathBuf;

use crate::commands::{GlobalArgs, Session};
use crate::core::context::{self, EnvContext};
use crate::core::error::TrainResult;
use crate::core::orchestrator::{MergeRequest, MergeTrain, PushMode};
use crate::core::vcs::ScmBackend;
use crate::utils;

/// Flags of `merge-train run`
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
  pub feature: Option<String>,
  pub target: Option<String>,
  pub approved_revision: Option<String>,
  pub repo_url: Option<String>,
  pub author: Option<String>,
  pub no_push: bool,
  pub handoff: Option<PathBuf>,
  pub json: bool,
}

/// Run the merge train
///
/// Flags override the CI environment variables of the same meaning.
pub fn run_train(global: &GlobalArgs, args: RunArgs) -> TrainResult<()> {
  let mut ctx = EnvContext::new(args.handoff.clone()).quiet(args.json);
  let session = Session::load(global, &ctx)?;

  ctx.set(context::FEATURE_BRANCH, args.feature.as_deref());
  ctx.set(context::TARGET_BRANCH, args.target.as_deref());
  ctx.set(context::APPROVED_REVISION, args.approved_revision.as_deref());
  ctx.set(context::COMMIT_USER_NAME, args.author.as_deref());
  if let Some(url) = &args.repo_url {
    ctx.set(context::REPO_URL, Some(&utils::absolutize_remote(url, &session.workspace)));
  }

  let request = MergeRequest::from_context(&ctx, &session.config.scm.default_author)?;
  let backend = session.backend()?;
  let mode = if args.no_push {
    PushMode::Deferred
  } else {
    PushMode::Immediate
  };

  if !args.json {
    println!(
      "🚂 Merging {} into {} ({} repository at {})",
      request.feature,
      if request.target.is_empty() {
        backend.trunk()
      } else {
        request.target.as_str()
      },
      backend.kind(),
      backend.work_dir().display()
    );
  }

  let mut train = MergeTrain::new(backend.as_ref(), &session.config);
  let report = train.run(&request, &mut ctx, mode)?;

  if args.json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    println!();
    print!("{}", report.to_human_readable());
    println!("\n✅ Merge train finished");
  }
  Ok(())
}
