//! Command invocations and the runner seam every external tool goes through.
//!
//! Operations build an [`Invocation`] describing the program, arguments,
//! working directory and extra environment, and hand it to a
//! [`CommandRunner`]. [`SystemRunner`] executes them for real; tests swap in a
//! recorder.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::CommandError;
use crate::handoff::{self, Handoff};

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, value) in vars {
            self = self.env(key, value);
        }
        self
    }

    pub fn display_program(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    #[cfg(test)]
    pub fn value_of_env(&self, key: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_os_str())
    }

    /// Build the std command without touching stdio.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Runs external tools on behalf of the launcher.
pub trait CommandRunner {
    /// Run to completion. The child's stdout and stderr both go to the
    /// launcher's stderr.
    fn run(&self, invocation: &Invocation) -> Result<(), CommandError>;

    /// Run to completion and return trimmed stdout.
    fn capture(&self, invocation: &Invocation) -> Result<String, CommandError>;

    /// Hand the process over to the server. Returns the exit code to
    /// terminate with; an exec handoff returns only on failure.
    fn hand_off(&self, invocation: &Invocation, handoff: &Handoff) -> Result<i32, CommandError>;

    /// Resolve `name` on the search path, then in `fallback_dirs`.
    fn locate(&self, name: &str, fallback_dirs: &[PathBuf]) -> Option<PathBuf>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<(), CommandError> {
        let program = invocation.display_program();
        let mut cmd = invocation.to_command();
        cmd.stdout(stderr_stdio()).stderr(Stdio::inherit());

        debug!(program = %program, args = ?invocation.args, "running");

        let status = cmd
            .stdin(Stdio::null())
            .status()
            .map_err(|source| spawn_error(&program, source))?;

        if !status.success() {
            return Err(CommandError::Status { program, status });
        }
        Ok(())
    }

    fn capture(&self, invocation: &Invocation) -> Result<String, CommandError> {
        let program = invocation.display_program();
        let output = invocation
            .to_command()
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| spawn_error(&program, source))?;

        if !output.status.success() {
            return Err(CommandError::Status {
                program,
                status: output.status,
            });
        }

        String::from_utf8(output.stdout)
            .map(|stdout| stdout.trim().to_string())
            .map_err(|_| CommandError::Output { program })
    }

    fn hand_off(&self, invocation: &Invocation, handoff: &Handoff) -> Result<i32, CommandError> {
        handoff::hand_off(invocation, handoff)
    }

    fn locate(&self, name: &str, fallback_dirs: &[PathBuf]) -> Option<PathBuf> {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }

        let cwd = std::env::current_dir().ok()?;
        let joined = std::env::join_paths(fallback_dirs).ok()?;
        which::which_in(name, Some(joined), cwd).ok()
    }
}

pub fn spawn_error(program: &str, source: io::Error) -> CommandError {
    CommandError::Spawn {
        program: program.to_string(),
        source,
    }
}

/// Stdio for a child's stdout that lands on our stderr, keeping our stdout
/// untouched until the server owns it.
fn stderr_stdio() -> Stdio {
    Stdio::from(io::stderr())
}
