//! Merge train runs against git repositories

use crate::helpers::*;
use anyhow::Result;

const TRAIN: [&str; 4] = ["r1336", "r1338", "r1340", "master"];

#[test]
fn test_train_lands_feature_on_every_later_branch() -> Result<()> {
  let fx = GitFixture::new()?;

  let output = run_merge_train(
    &fx.work,
    &["--scm", "git", "run", "--feature", "c3", "--target", "r1336"],
  )?;
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("Merge train finished"), "stdout: {}", stdout);

  for branch in TRAIN {
    assert_eq!(
      fx.origin_file(branch, "c3.txt").as_deref(),
      Some("feature c3\n"),
      "c3.txt missing on {}",
      branch
    );
  }
  // Later releases keep their own content
  assert_eq!(fx.origin_file("master", "r1340.txt").as_deref(), Some("r1340"));
  assert_eq!(fx.origin_file("r1336", "r1338.txt"), None);

  assert_eq!(fx.origin_log("r1336")?[0], "[Merge Train] Merged c3 into r1336");
  assert_eq!(fx.origin_log("r1338")?[0], "[Merge Train] Merged r1336 into r1338");
  assert_eq!(fx.origin_log("master")?[0], "[Merge Train] Merged r1340 into master");
  Ok(())
}

#[test]
fn test_environment_drives_the_run() -> Result<()> {
  let fx = GitFixture::new()?;

  let output = std::process::Command::new(env!("CARGO_BIN_EXE_merge-train"))
    .current_dir(&fx.work)
    .args(["--scm", "git", "run", "--json"])
    .env("FEATURE_BRANCH", "c3")
    .env("TARGET_BRANCH", "r1338")
    .env("COMMIT_USER_NAME", "Release Bot <bot@example.com>")
    .env_remove("APPROVED_REVISION")
    .env_remove("REPO_URL")
    .env_remove("REPO_SUBDIR")
    .output()?;
  assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

  let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
  assert_eq!(report["target"], "r1338");
  assert_eq!(report["pushed"], true);
  assert_eq!(report["closed_feature"], false);
  assert_eq!(report["merges"].as_array().map(Vec::len), Some(3));

  assert!(fx.origin_file("r1338", "c3.txt").is_some());
  assert_eq!(fx.origin_file("r1336", "c3.txt"), None);

  let author = git(&fx.origin, &["log", "-1", "--format=%an <%ae>", "r1338"])?;
  assert_eq!(String::from_utf8_lossy(&author.stdout).trim(), "Release Bot <bot@example.com>");
  Ok(())
}

#[test]
fn test_conflict_stops_before_push() -> Result<()> {
  let fx = GitFixture::new()?;
  fx.push_change("r1338", "shared.txt", "r1338 edit\n")?;
  fx.push_change("c3", "shared.txt", "c3 edit\n")?;

  let output = merge_train(
    &fx.work,
    &["--scm", "git", "run", "--feature", "c3", "--target", "r1336"],
  )?;

  assert_eq!(output.status.code(), Some(4));
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("Merge conflict"), "stderr: {}", stderr);
  assert!(stderr.contains("upmerge"), "stderr: {}", stderr);

  // Nothing reached the remote, not even the clean gatekeeper merge
  for branch in TRAIN {
    assert_eq!(fx.origin_file(branch, "c3.txt"), None, "{} was pushed", branch);
  }
  Ok(())
}

#[test]
fn test_deferred_push_hands_over_branch_list() -> Result<()> {
  let fx = GitFixture::new()?;
  let handoff_dir = tempfile::TempDir::new()?;
  let handoff = handoff_dir.path().join("handoff.properties");

  run_merge_train(
    &fx.work,
    &[
      "--scm",
      "git",
      "run",
      "--feature",
      "c3",
      "--target",
      "r1336",
      "--no-push",
      "--handoff",
      &handoff.display().to_string(),
    ],
  )?;

  let content = std::fs::read_to_string(&handoff)?;
  assert_eq!(content, "BRANCHES_TO_PUSH=r1336,r1338,r1340,master,c3\n");
  assert_eq!(fx.origin_file("r1336", "c3.txt"), None);
  assert!(fx.work_file("master", "c3.txt").is_some());

  let list = content.trim().trim_start_matches("BRANCHES_TO_PUSH=");
  run_merge_train(&fx.work, &["--scm", "git", "push", "--branches", list])?;

  for branch in TRAIN {
    assert!(fx.origin_file(branch, "c3.txt").is_some(), "{} not pushed", branch);
  }
  Ok(())
}

#[test]
fn test_diverged_remote_rejects_push_and_retry_succeeds() -> Result<()> {
  let fx = GitFixture::new()?;

  run_merge_train(
    &fx.work,
    &["--scm", "git", "run", "--feature", "c3", "--target", "r1336", "--no-push"],
  )?;
  fx.push_change("r1338", "hotfix.txt", "hotfix\n")?;

  let output = merge_train(
    &fx.work,
    &["--scm", "git", "push", "--branches", "r1336,r1338,r1340,master"],
  )?;
  assert_eq!(output.status.code(), Some(2));
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("push rejected"), "stderr: {}", stderr);

  // Local merge commits survive the rejection
  assert!(fx.work_file("r1338", "c3.txt").is_some());
  assert_eq!(fx.origin_file("r1338", "c3.txt"), None);

  run_merge_train(
    &fx.work,
    &["--scm", "git", "run", "--feature", "c3", "--target", "r1336"],
  )?;
  for branch in ["r1338", "r1340", "master"] {
    assert!(fx.origin_file(branch, "c3.txt").is_some(), "c3.txt missing on {}", branch);
    assert!(fx.origin_file(branch, "hotfix.txt").is_some(), "hotfix.txt missing on {}", branch);
  }
  Ok(())
}

#[test]
fn test_missing_release_branch_is_created() -> Result<()> {
  let fx = GitFixture::new()?;
  // Outside the clone, so the clean step cannot remove it
  let config_dir = tempfile::TempDir::new()?;
  let config = config_dir.path().join("train.toml");
  std::fs::write(
    &config,
    "[release]\nseed_file = \"RELEASE\"\nseed_template = \"{{release}}\"\n",
  )?;

  run_merge_train(
    &fx.work,
    &[
      "--scm",
      "git",
      "--config",
      &config.display().to_string(),
      "run",
      "--feature",
      "c3",
      "--target",
      "r1339",
    ],
  )?;

  assert_eq!(fx.origin_file("r1339", "RELEASE").as_deref(), Some("2013.39"));
  assert!(fx.origin_file("r1339", "c3.txt").is_some());
  assert!(fx.origin_file("r1340", "c3.txt").is_some());
  assert!(fx.origin_file("master", "c3.txt").is_some());
  assert_eq!(fx.origin_file("r1338", "c3.txt"), None);
  Ok(())
}

#[test]
fn test_invalid_target_is_a_user_error() -> Result<()> {
  let fx = GitFixture::new()?;
  let output = merge_train(
    &fx.work,
    &["--scm", "git", "run", "--feature", "c3", "--target", "release-7"],
  )?;
  assert_eq!(output.status.code(), Some(1));
  assert!(String::from_utf8_lossy(&output.stderr).contains("release-7"));
  Ok(())
}

#[test]
fn test_next_and_branches() -> Result<()> {
  let fx = GitFixture::new()?;

  let output = run_merge_train(&fx.work, &["--scm", "git", "next", "r1336"])?;
  assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "r1338");
  let output = run_merge_train(&fx.work, &["--scm", "git", "next", "r1340"])?;
  assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "master");
  let output = run_merge_train(&fx.work, &["--scm", "git", "next", "r1336", "--offline"])?;
  assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "r1337");

  let output = run_merge_train(&fx.work, &["--scm", "git", "branches", "--json"])?;
  let rows: serde_json::Value = serde_json::from_slice(&output.stdout)?;
  let names: Vec<&str> = rows
    .as_array()
    .map(|rows| rows.iter().filter_map(|r| r["name"].as_str()).collect())
    .unwrap_or_default();
  for branch in ["master", "r1336", "r1338", "r1340", "c3"] {
    assert!(names.contains(&branch), "{} missing from {:?}", branch, names);
  }
  Ok(())
}
