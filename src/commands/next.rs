use crate::commands::{GlobalArgs, Session};
use crate::core::context::EnvContext;
use crate::core::error::TrainResult;
use crate::core::sequencer::Sequencer;
use crate::core::vcs::{ScmBackend, ScmKind};

/// Print the release that follows `branch`
///
/// Online, this is the next release branch that exists in the repository
/// (trunk after the newest one). With `offline` it is plain week arithmetic
/// and no repository is needed.
pub fn run_next(global: &GlobalArgs, branch: String, offline: bool) -> TrainResult<()> {
  let ctx = EnvContext::new(None);
  let session = Session::load(global, &ctx)?;
  let label_format = session.config.release.label_format.clone();

  let (sequencer, next) = if offline {
    let sequencer = Sequencer::new(offline_trunk(&session), label_format);
    let next = sequencer.parse(&branch)?.next();
    (sequencer, next)
  } else {
    let backend = session.backend()?;
    let sequencer = Sequencer::new(backend.trunk(), label_format);
    let id = sequencer.parse(&branch)?;
    let existing = backend.branch_names(false)?;
    let next = sequencer.next_existing(id, &existing);
    (sequencer, next)
  };

  tracing::debug!(from = %branch, next = %next, label = %sequencer.release_label(next), "next release");
  println!("{}", sequencer.name_of(next));
  Ok(())
}

/// Trunk name without talking to a repository
fn offline_trunk(session: &Session) -> String {
  if let [repo] = session.config.repositories.as_slice() {
    return repo.trunk().to_string();
  }
  let dir = match &session.repo_subdir {
    Some(subdir) => session.workspace.join(subdir),
    None => session.workspace.clone(),
  };
  ScmKind::detect(&dir).unwrap_or(ScmKind::Hg).default_trunk().to_string()
}
