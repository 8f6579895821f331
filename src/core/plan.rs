//! Reviewable plans for a merge train run
//!
//! Before touching a repository the train can describe what it is going to
//! do: which branches it creates, merges, closes and pushes. The plan is:
//!
//! - **Dry-run output**: `merge-train plan` prints it and stops
//! - **Auditable**: JSON-serializable for CI logs
//! - **Content-addressed**: the id is a hash of the operations, so two runs
//!   with the same inputs and branch set print the same id
//!
//! ```text
//! Branch list + request
//!   ↓
//! MergePlan (what to do)
//!   ↓
//! MergeTrain::run (do it)
//!   ↓
//! TrainReport
//! ```

use crate::core::error::TrainResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Plan identifier (SHA256 hash of plan contents)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanId(String);

impl PlanId {
  /// Create a plan ID from plan contents
  pub fn from_contents(contents: &[u8]) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let result = hasher.finalize();
    Self(format!("{:x}", result))
  }

  /// Get the short ID (first 12 characters)
  pub fn short(&self) -> &str {
    &self.0[..12.min(self.0.len())]
  }
}

impl fmt::Display for PlanId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.short())
  }
}

/// One step of a merge train run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
  /// Drop commits left behind by an aborted run
  StripLocal,

  /// Pull from a remote (the default one when `remote` is unset)
  Pull {
    remote: Option<String>,
    branch: Option<String>,
  },

  /// Create a release branch from trunk
  CreateReleaseBranch {
    name: String,
    from: String,
    seed_file: Option<String>,
  },

  /// Discard local changes and switch branch
  UpdateClean { branch: String },

  /// Merge one ref into a branch
  Merge { from: String, into: String },

  /// Commit the pending merge
  Commit { branch: String, message: String },

  /// Close the feature branch
  CloseBranch { name: String },

  /// Publish branches
  Push { branches: Vec<String> },

  /// Hand a value to a later CI stage instead of acting on it
  Export { key: String, value: String },
}

/// Plan metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
  /// Plan ID (content hash)
  pub id: PlanId,

  /// Feature branch being released
  pub feature: String,

  /// Release branch the feature lands on
  pub target: String,

  /// Whether this plan publishes to the shared remote
  pub is_destructive: bool,
}

/// A sequence of operations for one merge train run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePlan {
  pub metadata: PlanMetadata,

  /// Operations to perform (in order)
  pub operations: Vec<Operation>,

  /// Human-readable summary
  pub summary: String,
}

impl MergePlan {
  pub fn new(feature: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      metadata: PlanMetadata {
        id: PlanId::from_contents(&[]),
        feature: feature.into(),
        target: target.into(),
        is_destructive: false,
      },
      operations: Vec::new(),
      summary: String::new(),
    }
  }

  /// Add an operation to the plan
  pub fn add_operation(&mut self, operation: Operation) {
    if matches!(operation, Operation::Push { .. }) {
      self.metadata.is_destructive = true;
    }
    self.operations.push(operation);
    self.recompute_id();
  }

  /// Set the summary
  pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
    self.summary = summary.into();
    self
  }

  /// Recompute plan ID based on current contents
  fn recompute_id(&mut self) {
    let json = serde_json::to_vec(&self.operations).unwrap_or_default();
    self.metadata.id = PlanId::from_contents(&json);
  }

  /// Every `(from, into)` merge in order
  pub fn merges(&self) -> Vec<(&str, &str)> {
    self
      .operations
      .iter()
      .filter_map(|op| match op {
        Operation::Merge { from, into } => Some((from.as_str(), into.as_str())),
        _ => None,
      })
      .collect()
  }

  /// Serialize to JSON
  pub fn to_json(&self) -> TrainResult<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Deserialize from JSON
  pub fn from_json(json: &str) -> TrainResult<Self> {
    Ok(serde_json::from_str(json)?)
  }

  /// Get human-readable representation
  pub fn to_human_readable(&self) -> String {
    let mut output = String::new();

    output.push_str(&format!("📋 Plan: merge train ({})\n", self.metadata.id));
    output.push_str(&format!(
      "   Feature: {} → {}\n",
      self.metadata.feature, self.metadata.target
    ));

    if !self.summary.is_empty() {
      output.push_str(&format!("\n{}\n", self.summary));
    }

    output.push_str(&format!("\n   Operations ({}):\n", self.operations.len()));

    for (i, op) in self.operations.iter().enumerate() {
      output.push_str(&format!("   {}. {}\n", i + 1, operation_to_string(op)));
    }

    if self.metadata.is_destructive {
      output.push_str("\n⚠️  NOTE: This run pushes to the shared remote\n");
    }

    output
  }

  pub fn len(&self) -> usize {
    self.operations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.operations.is_empty()
  }
}

/// Convert operation to human-readable string
fn operation_to_string(op: &Operation) -> String {
  match op {
    Operation::StripLocal => "Strip local-only commits".to_string(),
    Operation::Pull { remote, branch } => match (remote, branch) {
      (None, None) => "Pull from default remote".to_string(),
      (Some(remote), None) => format!("Pull from {}", remote),
      (None, Some(branch)) => format!("Pull {} from default remote", branch),
      (Some(remote), Some(branch)) => format!("Pull {} from {}", branch, remote),
    },
    Operation::CreateReleaseBranch { name, from, seed_file } => match seed_file {
      Some(file) => format!("Create release branch {} from {} (seeding {})", name, from, file),
      None => format!("Create release branch {} from {}", name, from),
    },
    Operation::UpdateClean { branch } => format!("Update clean to {}", branch),
    Operation::Merge { from, into } => format!("Merge {} into {}", from, into),
    Operation::Commit { branch, message } => format!("Commit on {}: {}", branch, message),
    Operation::CloseBranch { name } => format!("Close branch {}", name),
    Operation::Push { branches } => format!("Push {}", branches.join(", ")),
    Operation::Export { key, value } => format!("Export {}={}", key, value),
  }
}
