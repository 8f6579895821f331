mod commands;
mod core;
mod telemetry;
mod utils;

use clap::{Parser, Subcommand};
use commands::{GlobalArgs, RunArgs};
use core::error::{TrainError, print_error};
use core::vcs::ScmKind;
use std::path::PathBuf;

/// Merge feature branches into weekly release branches and upmerge to trunk
#[derive(Parser)]
#[command(name = "merge-train")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(styles = get_styles())]
struct Cli {
  /// Workspace holding the repository (defaults to the current directory)
  #[arg(short = 'C', long, global = true)]
  workspace: Option<PathBuf>,

  /// Configuration file (defaults to train.toml in the workspace)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Force the version control tool instead of the configured one
  #[arg(long, global = true)]
  scm: Option<ScmKind>,

  /// Repository subdir inside the workspace (overrides REPO_SUBDIR)
  #[arg(long, global = true)]
  repo_subdir: Option<String>,

  /// More log output (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  /// Emit logs as JSON lines on stderr
  #[arg(long, global = true)]
  log_json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Merge a feature into its release branch, close it, upmerge and push
  Run {
    /// Feature branch to merge (overrides FEATURE_BRANCH)
    #[arg(long)]
    feature: Option<String>,
    /// Release branch to merge into, e.g. r1336; trunk when empty (overrides TARGET_BRANCH)
    #[arg(long)]
    target: Option<String>,
    /// Exact revision that was approved (overrides APPROVED_REVISION)
    #[arg(long)]
    approved_revision: Option<String>,
    /// Repository to pull the feature from (overrides REPO_URL)
    #[arg(long)]
    repo_url: Option<String>,
    /// Commit author (overrides COMMIT_USER_NAME)
    #[arg(long)]
    author: Option<String>,
    /// Do not push; export BRANCHES_TO_PUSH for a later stage instead
    #[arg(long)]
    no_push: bool,
    /// File to append KEY=value handoff lines to
    #[arg(long)]
    handoff: Option<PathBuf>,
    /// Output the run report in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Show what `run` would do without changing the repository
  Plan {
    /// Feature branch to merge (overrides FEATURE_BRANCH)
    #[arg(long)]
    feature: Option<String>,
    /// Release branch to merge into (overrides TARGET_BRANCH)
    #[arg(long)]
    target: Option<String>,
    /// Output plan in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Push a comma-separated branch list
  Push {
    /// Branches to push (overrides BRANCHES_TO_PUSH)
    #[arg(long)]
    branches: Option<String>,
  },

  /// Print the next existing release after a branch
  Next {
    /// Release branch, e.g. r1336
    branch: String,
    /// Week arithmetic only; do not look at the repository
    #[arg(long)]
    offline: bool,
  },

  /// List branches
  Branches {
    /// Include closed branches
    #[arg(long)]
    closed: bool,
    /// Output branches in JSON format
    #[arg(long)]
    json: bool,
  },
}

fn main() {
  let cli = Cli::parse();
  telemetry::init_tracing(cli.log_json, telemetry::level_for(cli.verbose));

  let global = GlobalArgs {
    workspace: cli.workspace,
    config: cli.config,
    scm: cli.scm,
    repo_subdir: cli.repo_subdir,
  };

  let result = match cli.command {
    Commands::Run {
      feature,
      target,
      approved_revision,
      repo_url,
      author,
      no_push,
      handoff,
      json,
    } => commands::run_train(
      &global,
      RunArgs {
        feature,
        target,
        approved_revision,
        repo_url,
        author,
        no_push,
        handoff,
        json,
      },
    ),
    Commands::Plan { feature, target, json } => commands::run_plan(&global, feature, target, json),
    Commands::Push { branches } => commands::run_push(&global, branches),
    Commands::Next { branch, offline } => commands::run_next(&global, branch, offline),
    Commands::Branches { closed, json } => commands::run_branches(&global, closed, json),
  };

  if let Err(err) = result {
    handle_error(err);
  }
}

fn handle_error(err: TrainError) -> ! {
  print_error(&err);
  std::process::exit(err.exit_code().as_i32());
}

fn get_styles() -> clap::builder::Styles {
  clap::builder::Styles::styled()
    .usage(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
    .header(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
    .literal(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))))
    .invalid(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
    )
    .error(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
    )
    .valid(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
    )
    .placeholder(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))))
}
