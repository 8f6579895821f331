//! Integration tests driving the merge-train binary against real repositories

mod helpers;
mod test_git_train;
mod test_hg_train;
mod test_plan;
