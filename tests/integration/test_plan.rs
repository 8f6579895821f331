//! Tests for the `plan` command

use crate::helpers::*;
use anyhow::Result;

#[test]
fn test_plan_lists_upmerge_chain_without_changes() -> Result<()> {
  let fx = GitFixture::new()?;
  let before = git(&fx.work, &["for-each-ref", "refs/heads/"])?.stdout;

  let output = run_merge_train(
    &fx.work,
    &["--scm", "git", "plan", "--feature", "c3", "--target", "r1336", "--json"],
  )?;
  let plan: serde_json::Value = serde_json::from_slice(&output.stdout)?;

  assert_eq!(plan["metadata"]["feature"], "c3");
  assert_eq!(plan["metadata"]["target"], "r1336");
  assert_eq!(plan["metadata"]["is_destructive"], true);

  let merges: Vec<(String, String)> = plan["operations"]
    .as_array()
    .map(|ops| {
      ops
        .iter()
        .filter(|op| op["type"] == "merge")
        .map(|op| {
          (
            op["from"].as_str().unwrap_or_default().to_string(),
            op["into"].as_str().unwrap_or_default().to_string(),
          )
        })
        .collect()
    })
    .unwrap_or_default();
  assert_eq!(
    merges,
    [("c3", "r1336"), ("r1336", "r1338"), ("r1338", "r1340"), ("r1340", "master")]
      .map(|(a, b)| (a.to_string(), b.to_string()))
      .to_vec()
  );

  // Planning leaves the clone and the remote alone
  assert_eq!(git(&fx.work, &["for-each-ref", "refs/heads/"])?.stdout, before);
  assert_eq!(fx.origin_file("r1336", "c3.txt"), None);
  Ok(())
}

#[test]
fn test_plan_human_output() -> Result<()> {
  let fx = GitFixture::new()?;
  let output = run_merge_train(
    &fx.work,
    &["--scm", "git", "plan", "--feature", "c3", "--target", "r1341"],
  )?;
  let stdout = String::from_utf8_lossy(&output.stdout);

  assert!(stdout.contains("📋 Plan: merge train"), "stdout: {}", stdout);
  assert!(stdout.contains("Create release branch r1341 from master"));
  assert!(stdout.contains("Merge r1341 into master"));
  assert!(!stdout.contains("r1338"));
  Ok(())
}

#[test]
fn test_plan_requires_feature() -> Result<()> {
  let fx = GitFixture::new()?;
  let output = merge_train(&fx.work, &["--scm", "git", "plan", "--target", "r1336"])?;
  assert_eq!(output.status.code(), Some(1));
  assert!(String::from_utf8_lossy(&output.stderr).contains("FEATURE_BRANCH"));
  Ok(())
}

#[test]
fn test_unconfigured_directory_has_no_backend() -> Result<()> {
  let dir = tempfile::TempDir::new()?;
  let output = merge_train(dir.path(), &["branches"])?;
  assert_eq!(output.status.code(), Some(3));
  assert!(String::from_utf8_lossy(&output.stderr).contains("no matching backend"));
  Ok(())
}
