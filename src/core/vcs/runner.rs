//! Process execution for VCS commands
//!
//! Backends describe a command as an [`Invocation`] and hand it to a
//! [`CommandRunner`]. The system runner spawns the tool with an isolated
//! environment and kills it when the time budget runs out.

use crate::core::error::{ScmError, ScmResult};
use crate::utils::redact_args;
use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often the runner checks whether the child exited
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A fully described command line
#[derive(Debug, Clone)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub work_dir: PathBuf,
  /// Extra variables on top of the forwarded parent environment
  pub env: Vec<(String, String)>,
  pub timeout: Duration,
}

impl Invocation {
  pub fn new(program: impl Into<String>, work_dir: &Path, timeout: Duration) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      work_dir: work_dir.to_path_buf(),
      env: Vec::new(),
      timeout,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.push((key.into(), value.into()));
    self
  }
}

/// Command line with credentials masked, safe for logs and error messages
impl fmt::Display for Invocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in redact_args(&self.args) {
      if arg.is_empty() || arg.contains(char::is_whitespace) {
        write!(f, " \"{}\"", arg)?;
      } else {
        write!(f, " {}", arg)?;
      }
    }
    Ok(())
  }
}

/// Combined stdout/stderr and exit status of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
  pub output: String,
  /// `-1` when the process was terminated by a signal
  pub exit_code: i32,
}

impl CommandOutput {
  pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
    Self {
      output: output.into(),
      exit_code,
    }
  }

  pub fn success(&self) -> bool {
    self.exit_code == 0
  }

  pub fn contains(&self, needle: &str) -> bool {
    self.output.contains(needle)
  }
}

/// Executes VCS commands on behalf of a backend
pub trait CommandRunner {
  /// Run to completion or until `invocation.timeout` expires
  ///
  /// A non-zero exit status is not an error at this level; only failing to
  /// start the tool or running out of time is.
  fn run(&self, invocation: &Invocation) -> ScmResult<CommandOutput>;
}

/// Parent variables handed to hg and git by default
///
/// Credentials and proxies belong to the CI host: ssh agents, askpass
/// helpers, hg config paths and proxy settings.
pub const DEFAULT_PASS_ENV: &[&str] = &[
  "SSH_AUTH_SOCK",
  "SSH_AGENT_PID",
  "SSH_ASKPASS",
  "GIT_SSH",
  "GIT_SSH_COMMAND",
  "GIT_ASKPASS",
  "HGRCPATH",
  "HTTP_PROXY",
  "HTTPS_PROXY",
  "NO_PROXY",
  "http_proxy",
  "https_proxy",
  "no_proxy",
];

/// Spawns real processes
#[derive(Debug, Clone)]
pub struct SystemRunner {
  pass_env: Vec<String>,
}

impl Default for SystemRunner {
  fn default() -> Self {
    Self::new(DEFAULT_PASS_ENV.iter().map(|key| key.to_string()))
  }
}

impl SystemRunner {
  /// Runner that forwards the named parent variables
  pub fn new<I, S>(pass_env: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      pass_env: pass_env.into_iter().map(Into::into).collect(),
    }
  }

  /// Build the process with an isolated environment
  ///
  /// - Clears environment variables
  /// - Whitelists PATH, HOME and the pass-through list, when set in `parent`
  /// - Adds the invocation's own variables
  fn command(&self, invocation: &Invocation, parent: &dyn Fn(&str) -> Option<OsString>) -> Command {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args);
    cmd.current_dir(&invocation.work_dir);

    cmd.env_clear();
    let keys = ["PATH", "HOME"].into_iter().chain(self.pass_env.iter().map(String::as_str));
    for key in keys {
      if let Some(value) = parent(key) {
        cmd.env(key, value);
      }
    }
    for (key, value) in &invocation.env {
      cmd.env(key, value);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd
  }
}

impl CommandRunner for SystemRunner {
  fn run(&self, invocation: &Invocation) -> ScmResult<CommandOutput> {
    tracing::debug!(command = %invocation, dir = %invocation.work_dir.display(), "running");

    let mut child = self.command(invocation, &|key| std::env::var_os(key)).spawn().map_err(|source| ScmError::Launch {
      command: invocation.to_string(),
      source,
    })?;

    // Drain both pipes on helper threads so a chatty tool never blocks on a full pipe
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + invocation.timeout;
    let status = loop {
      match child.try_wait() {
        Ok(Some(status)) => break status,
        Ok(None) => {}
        Err(source) => {
          return Err(ScmError::Launch {
            command: invocation.to_string(),
            source,
          });
        }
      }
      if Instant::now() >= deadline {
        let _ = child.kill();
        let _ = child.wait();
        tracing::error!(command = %invocation, timeout_secs = invocation.timeout.as_secs(), "command timed out");
        return Err(ScmError::CommandTimeout {
          command: invocation.to_string(),
          timeout_secs: invocation.timeout.as_secs(),
        });
      }
      thread::sleep(POLL_INTERVAL);
    };

    let mut output = join_reader(stdout);
    let err_text = join_reader(stderr);
    if !err_text.is_empty() {
      if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
      }
      output.push_str(&err_text);
    }

    let exit_code = status.code().unwrap_or(-1);
    tracing::debug!(command = %invocation, exit_code, "finished");
    Ok(CommandOutput::new(exit_code, output))
  }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
  thread::spawn(move || {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf);
    buf
  })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
  handle
    .and_then(|h| h.join().ok())
    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    .unwrap_or_default()
}
