use crate::commands::{GlobalArgs, Session};
use crate::core::context::{self, EnvContext};
use crate::core::error::TrainResult;
use crate::core::orchestrator::{MergeRequest, MergeTrain, PushMode};

/// Print the plan for a merge train run without changing anything
///
/// Uses the branches the local repository knows; run after a pull for an
/// accurate upmerge chain.
pub fn run_plan(global: &GlobalArgs, feature: Option<String>, target: Option<String>, json: bool) -> TrainResult<()> {
  let mut ctx = EnvContext::new(None).quiet(json);
  let session = Session::load(global, &ctx)?;
  ctx.set(context::FEATURE_BRANCH, feature.as_deref());
  ctx.set(context::TARGET_BRANCH, target.as_deref());

  let request = MergeRequest::from_context(&ctx, &session.config.scm.default_author)?;
  let backend = session.backend()?;
  let train = MergeTrain::new(backend.as_ref(), &session.config);
  let plan = train.plan(&request, PushMode::Immediate)?;

  if json {
    println!("{}", plan.to_json()?);
  } else {
    print!("{}", plan.to_human_readable());
    println!("\n💡 Run 'merge-train run' to execute this plan");
  }
  Ok(())
}
