use serde::Serialize;

use crate::commands::{GlobalArgs, Session};
use crate::core::context::EnvContext;
use crate::core::error::TrainResult;
use crate::core::sequencer::Sequencer;
use crate::core::vcs::{Branch, ScmBackend};

/// One row of `merge-train branches --json`
#[derive(Debug, Serialize)]
struct BranchRow {
  #[serde(flatten)]
  branch: Branch,
  /// Release label for `rYYWW` branches and trunk
  release: Option<String>,
}

/// List branches, marking release branches with their label
pub fn run_branches(global: &GlobalArgs, closed: bool, json: bool) -> TrainResult<()> {
  let ctx = EnvContext::new(None);
  let session = Session::load(global, &ctx)?;
  let backend = session.backend()?;
  let sequencer = Sequencer::new(backend.trunk(), session.config.release.label_format.clone());

  let rows: Vec<BranchRow> = backend
    .list_branches(closed)?
    .into_iter()
    .map(|branch| {
      let release = sequencer.parse(&branch.name).ok().map(|id| sequencer.release_label(id));
      BranchRow { branch, release }
    })
    .collect();

  if json {
    println!("{}", serde_json::to_string_pretty(&rows)?);
    return Ok(());
  }

  println!("🌿 Branches in {} ({})", backend.work_dir().display(), backend.kind());
  for row in &rows {
    let marker = if row.branch.closed { " (closed)" } else { "" };
    match &row.release {
      Some(label) => println!("   {}{}  [{}]", row.branch.name, marker, label),
      None => println!("   {}{}", row.branch.name, marker),
    }
  }
  Ok(())
}
