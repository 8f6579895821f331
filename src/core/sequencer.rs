//! Release ordering over `r<YY><WW>` branch names
//!
//! Release branches are named for a two-digit year and a two-digit ISO week
//! (`r1336` is week 36 of 2013). Only some weeks get a branch, so "the next
//! release" is the next week that actually has a branch, or trunk once no
//! later release exists.
//!
//! [`ReleaseId`] is a plain `Copy` value; advancing returns a new value, so
//! the orchestrator can hold a "current" and a "lookahead" cursor without
//! aliasing. Everything that needs the trunk name or the label format goes
//! through [`Sequencer`].

use crate::core::error::ReleaseError;
use crate::core::template::{self, Vars};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

/// Matches a release branch name and captures year and week digits
static RELEASE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^r(\d{2})(\d{2})$").expect("static regex"));

/// Weeks per release year; week 52 rolls over to week 1
pub const WEEKS_PER_YEAR: u8 = 52;

/// Default label format: `r1336` → `2013.36`
pub const DEFAULT_LABEL_FORMAT: &str = "20{{year}}.{{week}}";

/// Position in the release sequence
///
/// Ordered by `(year, week)`; `Trunk` sorts after every dated release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseId {
  Dated { year: u8, week: u8 },
  Trunk,
}

impl ReleaseId {
  /// Build a dated release, checking the week range
  pub fn dated(year: u8, week: u8) -> Option<Self> {
    (year <= 99 && (1..=WEEKS_PER_YEAR).contains(&week)).then_some(ReleaseId::Dated { year, week })
  }

  /// The immediately following calendar week, regardless of which branches exist
  ///
  /// Never moves backwards: the week after `r9952` is trunk.
  pub fn next(self) -> Self {
    match self {
      ReleaseId::Dated { year: 99, week } if week >= WEEKS_PER_YEAR => ReleaseId::Trunk,
      ReleaseId::Dated { year, week } if week >= WEEKS_PER_YEAR => ReleaseId::Dated { year: year + 1, week: 1 },
      ReleaseId::Dated { year, week } => ReleaseId::Dated { year, week: week + 1 },
      ReleaseId::Trunk => ReleaseId::Trunk,
    }
  }

  pub fn is_trunk(self) -> bool {
    matches!(self, ReleaseId::Trunk)
  }
}

impl fmt::Display for ReleaseId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ReleaseId::Dated { year, week } => write!(f, "r{:02}{:02}", year, week),
      ReleaseId::Trunk => write!(f, "<trunk>"),
    }
  }
}

/// Parses, names and walks release branches for one repository
#[derive(Debug, Clone)]
pub struct Sequencer {
  trunk: String,
  label_format: String,
}

impl Sequencer {
  pub fn new(trunk: impl Into<String>, label_format: impl Into<String>) -> Self {
    Self {
      trunk: trunk.into(),
      label_format: label_format.into(),
    }
  }

  /// Trunk branch name (`default` for Mercurial, usually `master` for Git)
  pub fn trunk(&self) -> &str {
    &self.trunk
  }

  /// Parse a branch name into a release position
  ///
  /// The empty name and the trunk name both mean trunk.
  pub fn parse(&self, name: &str) -> Result<ReleaseId, ReleaseError> {
    if name.is_empty() || name == self.trunk {
      return Ok(ReleaseId::Trunk);
    }
    parse_dated(name).ok_or_else(|| ReleaseError::InvalidReleaseName {
      name: name.to_string(),
      trunk: self.trunk.clone(),
    })
  }

  /// Branch name for a release position
  pub fn name_of(&self, id: ReleaseId) -> String {
    match id {
      ReleaseId::Trunk => self.trunk.clone(),
      dated => dated.to_string(),
    }
  }

  /// Human-readable label used in commit messages and seed files
  pub fn release_label(&self, id: ReleaseId) -> String {
    let ReleaseId::Dated { year, week } = id else {
      return self.trunk.clone();
    };

    let mut vars = Vars::new();
    vars.insert("year".to_string(), format!("{:02}", year));
    vars.insert("week".to_string(), format!("{:02}", week));
    vars.insert("branch".to_string(), id.to_string());

    // A broken label format falls back to the branch name
    template::render(&self.label_format, &vars).unwrap_or_else(|_| id.to_string())
  }

  /// Advance to the next release that exists in `branches`
  ///
  /// Walks week by week until a week with a branch is found. Once the walk
  /// passes the newest release in `branches` it collapses to trunk, so a
  /// deleted branch is never invented and never skipped over silently.
  pub fn next_existing<S: AsRef<str>>(&self, id: ReleaseId, branches: &[S]) -> ReleaseId {
    let existing: HashSet<ReleaseId> = branches.iter().filter_map(|b| parse_dated(b.as_ref())).collect();
    let Some(newest) = existing.iter().copied().max() else {
      return ReleaseId::Trunk;
    };

    let mut cursor = id.next();
    loop {
      if cursor.is_trunk() || existing.contains(&cursor) {
        return cursor;
      }
      if cursor > newest {
        return ReleaseId::Trunk;
      }
      cursor = cursor.next();
    }
  }

  /// Every `(source, target)` pair the upmerge loop visits, starting at `from`
  pub fn upmerge_chain<S: AsRef<str>>(&self, from: ReleaseId, branches: &[S]) -> Vec<(ReleaseId, ReleaseId)> {
    let mut chain = Vec::new();
    let mut current = from;
    loop {
      let next = self.next_existing(current, branches);
      if next == current {
        return chain;
      }
      chain.push((current, next));
      current = next;
    }
  }
}

/// Parse `rYYWW` with week in range, ignoring trunk
fn parse_dated(name: &str) -> Option<ReleaseId> {
  let caps = RELEASE_PATTERN.captures(name)?;
  let year = caps[1].parse().ok()?;
  let week = caps[2].parse().ok()?;
  ReleaseId::dated(year, week)
}
