use crate::commands::{GlobalArgs, Session};
use crate::core::context::{self, BuildContext, EnvContext};
use crate::core::error::{ConfigError, TrainError, TrainResult};
use crate::core::vcs::ScmBackend;

/// Push a branch list, typically the one `run --no-push` handed over
pub fn run_push(global: &GlobalArgs, branches: Option<String>) -> TrainResult<()> {
  let ctx = EnvContext::new(None);
  let session = Session::load(global, &ctx)?;

  let list = branches
    .filter(|b| !b.is_empty())
    .or_else(|| ctx.var(context::BRANCHES_TO_PUSH))
    .ok_or_else(|| ConfigError::MissingField {
      field: context::BRANCHES_TO_PUSH.to_string(),
    })?;
  let branches = split_branch_list(&list);
  if branches.is_empty() {
    return Err(TrainError::with_help(
      format!("{} names no branches", context::BRANCHES_TO_PUSH),
      "Pass a comma-separated list, e.g. --branches r1336,r1338,default",
    ));
  }

  let backend = session.backend()?;
  println!("🚀 Pushing {}", branches.join(", "));
  let output = backend.push(&branches)?;
  tracing::debug!(output = %output, "push finished");
  println!("✅ Pushed {} branch(es)", branches.len());
  Ok(())
}

/// Split `a, b,,c` into `[a, b, c]`
fn split_branch_list(list: &str) -> Vec<String> {
  list
    .split(',')
    .map(str::trim)
    .filter(|b| !b.is_empty())
    .map(str::to_string)
    .collect()
}
