use crate::core::error::{ConfigError, ResultExt, TrainError, TrainResult};
use crate::core::sequencer::DEFAULT_LABEL_FORMAT;
use crate::core::template::{self, Vars};
use crate::core::vcs::ScmKind;
use crate::core::vcs::runner::DEFAULT_PASS_ENV;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for merge-train
/// Searched in order: train.toml, .train.toml, .config/train.toml
///
/// Every section is optional; a missing file means all defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainConfig {
  #[serde(default)]
  pub scm: ScmSettings,
  #[serde(default)]
  pub release: ReleaseSettings,
  #[serde(default)]
  pub commit: CommitSettings,
  #[serde(default)]
  pub repositories: Vec<RepositoryConfig>,
}

/// Tool locations and time budgets shared by both backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScmSettings {
  /// Mercurial executable (default: "hg")
  #[serde(default = "default_hg")]
  pub hg_executable: String,

  /// Git executable (default: "git")
  #[serde(default = "default_git")]
  pub git_executable: String,

  /// Seconds a local command may run (default: 360)
  #[serde(default = "default_local_timeout")]
  pub local_timeout_secs: u64,

  /// Seconds a push or pull may run (default: 3600)
  #[serde(default = "default_remote_timeout")]
  pub remote_timeout_secs: u64,

  /// Identity for commits nobody asked for explicitly, e.g. merging hg heads
  #[serde(default = "default_author")]
  pub default_author: String,

  /// Parent variables forwarded to hg and git besides PATH and HOME
  ///
  /// Replaces the default list (ssh agent, askpass, HGRCPATH, proxies).
  #[serde(default = "default_pass_env")]
  pub pass_env: Vec<String>,
}

fn default_hg() -> String {
  "hg".to_string()
}

fn default_git() -> String {
  "git".to_string()
}

fn default_local_timeout() -> u64 {
  360
}

fn default_remote_timeout() -> u64 {
  3600
}

fn default_author() -> String {
  "merge-train <merge-train@localhost>".to_string()
}

fn default_pass_env() -> Vec<String> {
  DEFAULT_PASS_ENV.iter().map(|key| key.to_string()).collect()
}

impl Default for ScmSettings {
  fn default() -> Self {
    Self {
      hg_executable: default_hg(),
      git_executable: default_git(),
      local_timeout_secs: default_local_timeout(),
      remote_timeout_secs: default_remote_timeout(),
      default_author: default_author(),
      pass_env: default_pass_env(),
    }
  }
}

impl ScmSettings {
  pub fn local_timeout(&self) -> Duration {
    Duration::from_secs(self.local_timeout_secs)
  }

  pub fn remote_timeout(&self) -> Duration {
    Duration::from_secs(self.remote_timeout_secs)
  }
}

/// How release branches are labelled and seeded
///
/// # Example
///
/// ```toml
/// [release]
/// label_format = "20{{year}}.{{week}}"
/// seed_file = "VERSION"
/// seed_template = "{{release}}\n"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSettings {
  /// Template for the human-readable release label (variables: year, week, branch)
  #[serde(default = "default_label_format")]
  pub label_format: String,

  /// File written into a new release branch, relative to the repository root
  #[serde(default)]
  pub seed_file: Option<PathBuf>,

  /// Template for the seed file (variables: release, branch)
  #[serde(default)]
  pub seed_template: Option<String>,
}

fn default_label_format() -> String {
  DEFAULT_LABEL_FORMAT.to_string()
}

impl Default for ReleaseSettings {
  fn default() -> Self {
    Self {
      label_format: default_label_format(),
      seed_file: None,
      seed_template: None,
    }
  }
}

/// Commit message settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSettings {
  /// Prefix for every commit the train makes (default: "[Merge Train]")
  #[serde(default = "default_message_prefix")]
  pub message_prefix: String,
}

fn default_message_prefix() -> String {
  "[Merge Train]".to_string()
}

impl Default for CommitSettings {
  fn default() -> Self {
    Self {
      message_prefix: default_message_prefix(),
    }
  }
}

impl CommitSettings {
  /// `"{prefix} {body}"`, or just the body when the prefix is empty
  pub fn message(&self, body: &str) -> String {
    if self.message_prefix.is_empty() {
      body.to_string()
    } else {
      format!("{} {}", self.message_prefix, body)
    }
  }
}

/// One repository in the workspace
///
/// ```toml
/// [[repositories]]
/// kind = "hg"
/// subdir = "app"
/// trunk = "default"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
  pub kind: ScmKind,

  /// Checkout location relative to the workspace (default: the workspace itself)
  #[serde(default)]
  pub subdir: Option<String>,

  /// Trunk branch name (default: "default" for hg, "master" for git)
  #[serde(default)]
  pub trunk: Option<String>,
}

impl RepositoryConfig {
  pub fn new(kind: ScmKind) -> Self {
    Self {
      kind,
      subdir: None,
      trunk: None,
    }
  }

  pub fn trunk(&self) -> &str {
    self.trunk.as_deref().unwrap_or_else(|| self.kind.default_trunk())
  }

  /// Subdir with `./` and trailing slashes removed; empty means the workspace root
  pub fn normalized_subdir(&self) -> String {
    normalize_subdir(self.subdir.as_deref().unwrap_or(""))
  }
}

/// Normalize a subdir hint so `./app/`, `app` and `app/` compare equal
pub fn normalize_subdir(subdir: &str) -> String {
  let mut s = subdir.trim();
  while let Some(rest) = s.strip_prefix("./") {
    s = rest;
  }
  let s = s.trim_end_matches('/');
  if s == "." { String::new() } else { s.to_string() }
}

impl TrainConfig {
  /// Find config file in search order: train.toml, .train.toml, .config/train.toml
  pub fn find_config_path(path: &Path) -> Option<PathBuf> {
    let candidates = [
      path.join("train.toml"),
      path.join(".train.toml"),
      path.join(".config").join("train.toml"),
    ];

    candidates.into_iter().find(|p| p.exists())
  }

  /// Load configuration for a workspace
  ///
  /// An explicit path must exist. Without one, the search locations are tried
  /// and defaults are used when none exists.
  pub fn load(workspace: &Path, explicit: Option<&Path>) -> TrainResult<Self> {
    let config_path = match explicit {
      Some(path) if !path.exists() => {
        return Err(ConfigError::NotFound {
          path: path.to_path_buf(),
        }
        .into());
      }
      Some(path) => path.to_path_buf(),
      None => match Self::find_config_path(workspace) {
        Some(path) => path,
        None => {
          tracing::debug!(workspace = %workspace.display(), "no train.toml found, using defaults");
          return Ok(Self::default());
        }
      },
    };

    let content = fs::read_to_string(&config_path)
      .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
    let config = Self::parse(&content).map_err(|e| match e {
      TrainError::Config(ConfigError::Invalid { reason }) => TrainError::Config(ConfigError::Parse {
        path: config_path.clone(),
        reason,
      }),
      other => other,
    })?;

    tracing::debug!(path = %config_path.display(), "loaded configuration");
    Ok(config)
  }

  /// Parse and validate TOML text
  pub fn parse(content: &str) -> TrainResult<Self> {
    let config: TrainConfig = toml_edit::de::from_str(content).map_err(|e| ConfigError::Invalid {
      reason: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
  }

  /// Check values that serde cannot
  pub fn validate(&self) -> TrainResult<()> {
    if self.scm.local_timeout_secs == 0 || self.scm.remote_timeout_secs == 0 {
      return Err(ConfigError::Invalid {
        reason: "timeouts must be at least one second".to_string(),
      }
      .into());
    }

    // Surface template syntax errors at load time rather than mid-run
    template::render(&self.release.label_format, &Vars::new())?;
    if let Some(seed) = &self.release.seed_template {
      template::render(seed, &Vars::new())?;
    }

    match (&self.release.seed_file, &self.release.seed_template) {
      (Some(_), None) => {
        return Err(TrainError::with_help(
          "release.seed_file is set but release.seed_template is missing",
          "Add seed_template under [release] or remove seed_file",
        ));
      }
      (None, Some(_)) => {
        return Err(TrainError::with_help(
          "release.seed_template is set but release.seed_file is missing",
          "Add seed_file under [release] or remove seed_template",
        ));
      }
      _ => {}
    }

    if self.repositories.len() > 1 {
      let mut seen = std::collections::HashSet::new();
      for repo in &self.repositories {
        let subdir = repo.normalized_subdir();
        if !seen.insert(subdir.clone()) {
          return Err(ConfigError::Invalid {
            reason: format!("two repositories share subdir '{}'", subdir),
          }
          .into());
        }
      }
    }

    Ok(())
  }

  /// Replace the repository list with a single repository of `kind`
  ///
  /// Keeps the configured trunk of a matching repository, so `--scm` only
  /// picks the tool.
  pub fn override_kind(&mut self, kind: ScmKind, subdir: Option<&str>) {
    let wanted = subdir.map(normalize_subdir).unwrap_or_default();
    let trunk = self
      .repositories
      .iter()
      .find(|r| r.kind == kind && r.normalized_subdir() == wanted)
      .and_then(|r| r.trunk.clone());
    self.repositories = vec![RepositoryConfig {
      kind,
      subdir: subdir.map(str::to_string),
      trunk,
    }];
  }
}
