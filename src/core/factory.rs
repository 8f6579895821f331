//! Backend selection
//!
//! A workspace may hold one repository or several side by side (one per
//! subdir). The job names the one it is about through `REPO_SUBDIR`; with a
//! single repository the hint is not needed.

use crate::core::config::{RepositoryConfig, TrainConfig, normalize_subdir};
use crate::core::error::{ScmError, ScmResult};
use crate::core::vcs::runner::CommandRunner;
use crate::core::vcs::{GitBackend, MercurialBackend, ScmBackend, ScmKind};
use std::path::Path;
use std::sync::Arc;

/// Pick the repository for this run and build its backend
///
/// - no repositories configured: detect hg/git in the workspace (or hint subdir)
/// - one repository: use it
/// - several: the single one whose `subdir` equals the hint
pub fn select_backend(
  config: &TrainConfig,
  subdir_hint: Option<&str>,
  workspace: &Path,
  runner: Arc<dyn CommandRunner>,
) -> ScmResult<Box<dyn ScmBackend>> {
  let hint = subdir_hint.map(normalize_subdir).unwrap_or_default();
  let repo = select_repository(config, &hint, workspace)?;

  let subdir = match repo.normalized_subdir() {
    s if s.is_empty() => hint,
    s => s,
  };
  let work_dir = if subdir.is_empty() {
    workspace.to_path_buf()
  } else {
    workspace.join(&subdir)
  };
  if !work_dir.is_dir() {
    return Err(ScmError::NoMatchingBackend {
      reason: format!("working directory {} does not exist", work_dir.display()),
    });
  }

  tracing::info!(kind = %repo.kind, work_dir = %work_dir.display(), trunk = repo.trunk(), "selected backend");
  Ok(match repo.kind {
    ScmKind::Hg => Box::new(MercurialBackend::new(runner, &work_dir, repo.trunk(), &config.scm)),
    ScmKind::Git => Box::new(GitBackend::new(runner, &work_dir, repo.trunk(), &config.scm)),
  })
}

fn select_repository(config: &TrainConfig, hint: &str, workspace: &Path) -> ScmResult<RepositoryConfig> {
  match config.repositories.as_slice() {
    [] => {
      let dir = if hint.is_empty() {
        workspace.to_path_buf()
      } else {
        workspace.join(hint)
      };
      ScmKind::detect(&dir)
        .map(RepositoryConfig::new)
        .ok_or_else(|| ScmError::NoMatchingBackend {
          reason: format!("no repositories configured and no .hg or .git found in {}", dir.display()),
        })
    }
    [single] => Ok(single.clone()),
    many => {
      let matches: Vec<&RepositoryConfig> = many.iter().filter(|r| r.normalized_subdir() == hint).collect();
      match matches.as_slice() {
        [one] => Ok((*one).clone()),
        [] => Err(ScmError::NoMatchingBackend {
          reason: format!(
            "{} repositories configured and none has subdir '{}'; no implementation available",
            many.len(),
            hint
          ),
        }),
        several => Err(ScmError::NoMatchingBackend {
          reason: format!("{} repositories share subdir '{}'", several.len(), hint),
        }),
      }
    }
  }
}
