//! Running external commands.
//!
//! Everything that touches the host through a helper binary (`mount`,
//! `umount`, the package manager, `chroot`) goes through a [`CommandRunner`].
//! [`ExecContext`] pairs a runner with the extra arguments that apply to the
//! current lifecycle phase.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{command}' exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
}

/// A command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Something that can run a command and report how it went.
///
/// A non-zero exit is not an error at this level; use [`run_checked`] or
/// [`ExecContext::run`] to turn it into one.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;
}

/// Run `invocation` and fail on a non-zero exit status.
pub fn run_checked(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
) -> Result<CommandOutput, ExecError> {
    debug!(command = %invocation, "running");
    let output = runner.run(invocation)?;
    if output.success() {
        Ok(output)
    } else {
        Err(ExecError::Failed {
            command: invocation.to_string(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Runs commands on the host with [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        let output = cmd.output().map_err(|source| ExecError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;
        Ok(CommandOutput {
            // Killed by a signal: report like a shell would.
            status: output.status.code().unwrap_or(128),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug)]
struct Rule {
    fragment: String,
    remaining: Option<usize>,
    output: CommandOutput,
}

#[derive(Debug, Default)]
struct Recording {
    calls: Vec<Invocation>,
    rules: Vec<Rule>,
}

/// In-memory runner that records every command and answers from a script.
///
/// Commands succeed with empty output unless a rule matches; a rule matches
/// when its fragment occurs in the rendered command line. Clones share the
/// same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command matching `fragment` exits with status 32.
    pub fn fail_on(&self, fragment: &str) {
        self.push_rule(fragment, None, failure(fragment));
    }

    /// The next `times` commands matching `fragment` exit with status 32.
    pub fn fail_times(&self, fragment: &str, times: usize) {
        self.push_rule(fragment, Some(times), failure(fragment));
    }

    /// Commands matching `fragment` succeed and print `stdout`.
    pub fn respond(&self, fragment: &str, stdout: &str) {
        let output = CommandOutput {
            stdout: stdout.to_string(),
            ..CommandOutput::default()
        };
        self.push_rule(fragment, None, output);
    }

    /// Commands run so far.
    pub fn calls(&self) -> Vec<Invocation> {
        self.lock().calls.clone()
    }

    /// Commands run so far, rendered as strings.
    pub fn command_lines(&self) -> Vec<String> {
        self.lock().calls.iter().map(ToString::to_string).collect()
    }

    /// Forget recorded calls, keep the rules.
    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    fn push_rule(&self, fragment: &str, remaining: Option<usize>, output: CommandOutput) {
        self.lock().rules.push(Rule {
            fragment: fragment.to_string(),
            remaining,
            output,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn failure(fragment: &str) -> CommandOutput {
    CommandOutput {
        status: 32,
        stdout: String::new(),
        stderr: format!("scripted failure for '{fragment}'"),
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let line = invocation.to_string();
        let mut recording = self.lock();
        recording.calls.push(invocation.clone());

        for rule in recording.rules.iter_mut() {
            if !line.contains(&rule.fragment) {
                continue;
            }
            match rule.remaining {
                Some(0) => continue,
                Some(ref mut n) => *n -= 1,
                None => {}
            }
            return Ok(rule.output.clone());
        }
        Ok(CommandOutput::default())
    }
}

/// A runner plus the extra arguments for the current phase.
///
/// Extensions that need to pass flags to the package manager for a window of
/// the lifecycle push them here in one hook and clear them in the paired one.
pub struct ExecContext {
    runner: Arc<dyn CommandRunner>,
    extra_args: Vec<String>,
}

impl ExecContext {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            extra_args: Vec::new(),
        }
    }

    /// Context running real host commands.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemRunner))
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// Shared handle to the runner.
    pub fn shared_runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    /// Run a command, failing on a non-zero exit.
    pub fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        run_checked(self.runner(), invocation)
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    pub fn push_extra_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
    }

    pub fn clear_extra_args(&mut self) {
        self.extra_args.clear();
    }

    /// Run `f` with `args` added, removing them again afterwards.
    pub fn with_extra_args<T>(
        &mut self,
        args: &[String],
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let before = self.extra_args.len();
        self.extra_args.extend_from_slice(args);
        let result = f(self);
        self.extra_args.truncate(before);
        result
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("extra_args", &self.extra_args)
            .finish_non_exhaustive()
    }
}
