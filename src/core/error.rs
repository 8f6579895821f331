//! Error types for merge-train with contextual messages and exit codes
//!
//! Every backend failure is converted into a typed [`ScmError`] at the lowest
//! layer (the backend that ran the command). Callers above the backend only
//! branch on variants, never on raw tool output. [`TrainError`] is the
//! top-level type the CLI prints and maps to an exit code.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for merge-train
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
  /// User error (config, invalid args, invalid release name)
  User = 1,
  /// System error (VCS tool, I/O, timeouts, push rejected)
  System = 2,
  /// Validation failure (no backend matches the configuration)
  Validation = 3,
  /// Merge conflict that needs a human
  Conflict = 4,
}

impl ExitCode {
  /// Convert to i32 for process exit
  pub fn as_i32(self) -> i32 {
    self as i32
  }
}

/// Failures reported by a version-control backend.
#[derive(Debug, Error)]
pub enum ScmError {
  /// Update target does not exist in the repository
  #[error("unknown revision '{revision}'\n{output}")]
  UnknownRevision { revision: String, output: String },

  /// The merge stopped on file-level conflicts
  #[error("merging '{source_ref}' into '{target}' produced conflicts\n{output}")]
  MergeConflict {
    source_ref: String,
    target: String,
    output: String,
  },

  /// The merge would not change anything (source already an ancestor)
  #[error("merging '{source_ref}' has no effect\n{output}")]
  MergeNoOp { source_ref: String, output: String },

  /// Push rejected because it would create a divergent head on the remote
  #[error("push rejected: remote has diverging changes\n{output}")]
  NewRemoteHead { output: String },

  /// The tool did not finish within its time budget
  #[error("command timed out after {timeout_secs}s: {command}")]
  CommandTimeout { command: String, timeout_secs: u64 },

  /// No backend implementation matches the configuration
  #[error("no matching backend: {reason}")]
  NoMatchingBackend { reason: String },

  /// The tool could not be started at all
  #[error("failed to launch {command}: {source}")]
  Launch {
    command: String,
    #[source]
    source: io::Error,
  },

  /// Any other tool failure, carrying the raw diagnostic
  #[error("{command} failed\n{output}")]
  ScmOperation { command: String, output: String },
}

impl ScmError {
  /// Catch-all failure with the raw diagnostic preserved
  pub fn operation(command: impl Into<String>, output: impl Into<String>) -> Self {
    ScmError::ScmOperation {
      command: command.into(),
      output: output.into(),
    }
  }

  pub fn is_conflict(&self) -> bool {
    matches!(self, ScmError::MergeConflict { .. })
  }

  pub fn is_no_op(&self) -> bool {
    matches!(self, ScmError::MergeNoOp { .. })
  }

  fn help_message(&self) -> Option<String> {
    match self {
      ScmError::MergeConflict { source_ref, target, .. } => Some(format!(
        "Merge conflicts must be resolved by hand: merge '{}' into '{}' locally, resolve the conflicting files, \
         push, and hand the change back to the merge train. No automatic retry will happen.",
        source_ref, target
      )),
      ScmError::NewRemoteHead { .. } => Some(
        "Someone pushed to the same branch meanwhile. Local merge commits were kept; pull, merge the new head, \
         and run the train again."
          .to_string(),
      ),
      ScmError::UnknownRevision { revision, .. } => Some(format!(
        "Check that '{}' exists on the remote and that the workspace has pulled it.",
        revision
      )),
      ScmError::CommandTimeout { .. } => {
        Some("Raise `scm.local_timeout_secs` or `scm.remote_timeout_secs` in train.toml.".to_string())
      }
      ScmError::NoMatchingBackend { .. } => Some(
        "Set `--scm` or add exactly one [[repositories]] entry whose `subdir` matches REPO_SUBDIR.".to_string(),
      ),
      ScmError::Launch { .. } => Some("Make sure the hg/git executable configured in train.toml is on PATH.".to_string()),
      _ => None,
    }
  }
}

/// Release naming errors
#[derive(Debug, Error)]
pub enum ReleaseError {
  /// Branch name is neither trunk nor a valid `r<YY><WW>` release
  #[error("release branch '{name}' is invalid (expected r<YY><WW> with week 01-52, or '{trunk}')")]
  InvalidReleaseName { name: String, trunk: String },
}

/// Template rendering errors
#[derive(Debug, Error)]
pub enum TemplateError {
  /// Syntax error or failed helper while rendering
  #[error("invalid template: {reason}")]
  Render { reason: String },
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
  /// Explicit config path does not exist
  #[error("configuration file not found: {}", .path.display())]
  NotFound { path: PathBuf },

  /// File could not be parsed
  #[error("failed to parse {}: {reason}", .path.display())]
  Parse { path: PathBuf, reason: String },

  /// A value is out of range or inconsistent
  #[error("invalid configuration: {reason}")]
  Invalid { reason: String },

  /// A required input was not provided by flags, environment, or config
  #[error("missing required value: {field}")]
  MissingField { field: String },
}

impl ConfigError {
  fn help_message(&self) -> Option<String> {
    match self {
      ConfigError::MissingField { field } => Some(format!(
        "Pass it as a flag or set the {} environment variable.",
        field
      )),
      ConfigError::NotFound { .. } => Some("Create train.toml or drop the --config flag to use defaults.".to_string()),
      _ => None,
    }
  }
}

/// Pipeline stage a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Prepare,
  Merge,
  Close,
  Upmerge,
  Push,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Stage::Prepare => write!(f, "prepare"),
      Stage::Merge => write!(f, "gatekeeper merge"),
      Stage::Close => write!(f, "close feature branch"),
      Stage::Upmerge => write!(f, "upmerge"),
      Stage::Push => write!(f, "push"),
    }
  }
}

/// Main error type for merge-train
#[derive(Debug, Error)]
pub enum TrainError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Release(#[from] ReleaseError),

  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Scm(#[from] ScmError),

  /// A backend failure tagged with the stage that was running
  #[error("{stage} step failed: {source}")]
  Step {
    stage: Stage,
    #[source]
    source: ScmError,
  },

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  /// Generic error with message and optional context
  #[error("{}", render_message(.message, .context))]
  Message {
    message: String,
    context: Option<String>,
    help: Option<String>,
  },
}

fn render_message(message: &str, context: &Option<String>) -> String {
  match context {
    Some(ctx) => format!("{}\n{}", message, ctx),
    None => message.to_string(),
  }
}

impl TrainError {
  /// Create a simple error message
  pub fn message(msg: impl Into<String>) -> Self {
    TrainError::Message {
      message: msg.into(),
      context: None,
      help: None,
    }
  }

  /// Create an error with help text
  pub fn with_help(msg: impl Into<String>, help: impl Into<String>) -> Self {
    TrainError::Message {
      message: msg.into(),
      context: None,
      help: Some(help.into()),
    }
  }

  /// Tag a backend failure with the stage it happened in
  pub fn step(stage: Stage, source: ScmError) -> Self {
    TrainError::Step { stage, source }
  }

  /// Add context to an existing error
  pub fn context(self, ctx: impl Into<String>) -> Self {
    let ctx_str = ctx.into();
    match self {
      TrainError::Message { message, context, help } => TrainError::Message {
        message,
        context: Some(context.map(|c| format!("{}\n{}", ctx_str, c)).unwrap_or(ctx_str)),
        help,
      },
      TrainError::Io(err) => TrainError::Message {
        message: format!("I/O error: {}", err),
        context: Some(ctx_str),
        help: None,
      },
      _ => self,
    }
  }

  /// The backend error underneath, if any
  pub fn scm(&self) -> Option<&ScmError> {
    match self {
      TrainError::Scm(e) | TrainError::Step { source: e, .. } => Some(e),
      _ => None,
    }
  }

  /// True when a person has to resolve merge conflicts
  pub fn is_conflict(&self) -> bool {
    self.scm().is_some_and(ScmError::is_conflict)
  }

  /// Get the appropriate exit code for this error
  pub fn exit_code(&self) -> ExitCode {
    match self {
      TrainError::Config(_) | TrainError::Release(_) | TrainError::Template(_) => ExitCode::User,
      TrainError::Message { .. } => ExitCode::User,
      TrainError::Io(_) => ExitCode::System,
      TrainError::Scm(e) | TrainError::Step { source: e, .. } => match e {
        ScmError::MergeConflict { .. } => ExitCode::Conflict,
        ScmError::NoMatchingBackend { .. } => ExitCode::Validation,
        _ => ExitCode::System,
      },
    }
  }

  /// Get contextual help message for this error
  pub fn help_message(&self) -> Option<String> {
    match self {
      TrainError::Config(e) => e.help_message(),
      TrainError::Scm(e) | TrainError::Step { source: e, .. } => e.help_message(),
      TrainError::Message { help, .. } => help.clone(),
      _ => None,
    }
  }
}

impl From<serde_json::Error> for TrainError {
  fn from(err: serde_json::Error) -> Self {
    TrainError::message(format!("JSON error: {}", err))
  }
}

/// Result type alias for merge-train
pub type TrainResult<T> = Result<T, TrainError>;

/// Result type alias for backend operations
pub type ScmResult<T> = Result<T, ScmError>;

/// Helper trait to add context to Results
pub trait ResultExt<T> {
  /// Add context to an error result
  fn context(self, ctx: impl Into<String>) -> TrainResult<T>;

  /// Add context using a closure (lazy evaluation)
  fn with_context<F>(self, f: F) -> TrainResult<T>
  where
    F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
  E: Into<TrainError>,
{
  fn context(self, ctx: impl Into<String>) -> TrainResult<T> {
    self.map_err(|e| e.into().context(ctx))
  }

  fn with_context<F>(self, f: F) -> TrainResult<T>
  where
    F: FnOnce() -> String,
  {
    self.map_err(|e| e.into().context(f()))
  }
}

/// Pretty-print an error to stderr with help text
pub fn print_error(error: &TrainError) {
  if error.is_conflict() {
    eprintln!("\n⛔ Merge conflict, manual resolution required\n");
  }

  eprintln!("\n❌ {}\n", error);

  if let Some(help) = error.help_message() {
    eprintln!("💡 Help: {}\n", help);
  }
}
