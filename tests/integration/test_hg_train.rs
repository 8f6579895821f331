//! Merge train runs against Mercurial repositories
//!
//! Ignored by default since they need `hg`: `cargo test -- --ignored`.

use crate::helpers::*;
use anyhow::Result;

#[test]
#[ignore = "needs the hg executable; run with --ignored"]
fn test_hg_train_merges_closes_and_upmerges() -> Result<()> {
  anyhow::ensure!(hg_available(), "the hg executable is not on PATH");
  let fx = HgFixture::new()?;

  run_merge_train(
    &fx.work,
    &["--scm", "hg", "run", "--feature", "c3", "--target", "r1336"],
  )?;

  for branch in ["r1336", "r1338", "r1340", "default"] {
    assert_eq!(
      fx.origin_file(branch, "c3.txt").as_deref(),
      Some("feature c3\n"),
      "c3.txt missing on {}",
      branch
    );
  }

  let open = fx.origin_open_branches()?;
  assert!(!open.contains(&"c3".to_string()), "c3 still open: {:?}", open);
  assert!(open.contains(&"r1340".to_string()));
  Ok(())
}

#[test]
#[ignore = "needs the hg executable; run with --ignored"]
fn test_hg_conflict_stops_before_push() -> Result<()> {
  anyhow::ensure!(hg_available(), "the hg executable is not on PATH");
  let fx = HgFixture::new()?;

  // Diverging edits of shared.txt on c3 and r1338
  for (branch, content) in [("r1338", "r1338 edit\n"), ("c3", "c3 edit\n")] {
    hg(&fx.origin, &["update", branch])?;
    std::fs::write(fx.origin.join("shared.txt"), content)?;
    hg(
      &fx.origin,
      &["--config", "ui.username=Test User <test@example.com>", "commit", "-m", "Edit shared.txt"],
    )?;
  }
  hg(&fx.origin, &["update", "null"])?;

  let output = merge_train(
    &fx.work,
    &["--scm", "hg", "run", "--feature", "c3", "--target", "r1336"],
  )?;
  assert_eq!(output.status.code(), Some(4));

  assert_eq!(fx.origin_file("r1336", "c3.txt"), None);
  assert!(fx.origin_open_branches()?.contains(&"c3".to_string()));
  Ok(())
}
