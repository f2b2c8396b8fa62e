//! Recording [`CommandRunner`] for unit tests.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use crate::error::CommandError;
use crate::handoff::Handoff;
use crate::process::{CommandRunner, Invocation};

#[derive(Debug, Default)]
pub struct FakeRunner {
    calls: RefCell<Vec<Invocation>>,
    handoffs: RefCell<Vec<(Invocation, Handoff)>>,
    tool: RefCell<Option<PathBuf>>,
    installs_tool: Option<PathBuf>,
    failures: Vec<(String, i32)>,
    captures: Vec<(String, String)>,
    simulate_fs: bool,
    server_exit: i32,
}

impl FakeRunner {
    pub fn with_tool(self, path: impl Into<PathBuf>) -> Self {
        *self.tool.borrow_mut() = Some(path.into());
        self
    }

    /// The tool appears once an installer script has run.
    pub fn installing_tool_at(mut self, path: impl Into<PathBuf>) -> Self {
        self.installs_tool = Some(path.into());
        self
    }

    /// Fail invocations matching `pattern` (program name, then words that
    /// must all appear among the arguments) with exit `code`.
    pub fn failing_on(mut self, pattern: &str, code: i32) -> Self {
        self.failures.push((pattern.to_string(), code));
        self
    }

    pub fn capturing(mut self, pattern: &str, stdout: &str) -> Self {
        self.captures.push((pattern.to_string(), stdout.to_string()));
        self
    }

    pub fn with_revisions(self, local: &str, upstream: &str) -> Self {
        self.capturing("git rev-parse HEAD", local)
            .capturing("git rev-parse @{u}", upstream)
    }

    /// Make clone and venv creation leave the files real tools would.
    pub fn simulating_fs(mut self) -> Self {
        self.simulate_fs = true;
        self
    }

    pub fn with_server_exit(mut self, code: i32) -> Self {
        self.server_exit = code;
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Calls rendered as `program arg arg ...` with `-C <dir>` dropped.
    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(render).collect()
    }

    pub fn handoffs(&self) -> Vec<(Invocation, Handoff)> {
        self.handoffs.borrow().clone()
    }

    fn failure_for(&self, invocation: &Invocation) -> Option<CommandError> {
        self.failures
            .iter()
            .find(|(pattern, _)| matches(pattern, invocation))
            .map(|(_, code)| CommandError::Status {
                program: invocation.display_program(),
                status: exit_status(*code),
            })
    }

    fn simulate(&self, invocation: &Invocation) {
        let program = invocation.display_program();
        let args: Vec<String> = invocation
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        if program == "sh" || program == "powershell" {
            if let Some(path) = &self.installs_tool {
                *self.tool.borrow_mut() = Some(path.clone());
            }
        }

        if !self.simulate_fs {
            return;
        }

        if program == "git" && args.first().map(String::as_str) == Some("clone") {
            if let Some(dest) = args.last() {
                fs::create_dir_all(Path::new(dest).join(".git")).expect("fake clone");
            }
        }

        if program == "uv" && args.first().map(String::as_str) == Some("venv") {
            if let Some(venv) = args.last() {
                let interpreter = if cfg!(windows) {
                    Path::new(venv).join("Scripts").join("python.exe")
                } else {
                    Path::new(venv).join("bin").join("python")
                };
                fs::create_dir_all(interpreter.parent().expect("parent")).expect("fake venv");
                fs::write(interpreter, b"").expect("fake interpreter");
            }
        }
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, invocation: &Invocation) -> Result<(), CommandError> {
        self.calls.borrow_mut().push(invocation.clone());
        if let Some(err) = self.failure_for(invocation) {
            return Err(err);
        }
        self.simulate(invocation);
        Ok(())
    }

    fn capture(&self, invocation: &Invocation) -> Result<String, CommandError> {
        self.calls.borrow_mut().push(invocation.clone());
        if let Some(err) = self.failure_for(invocation) {
            return Err(err);
        }
        Ok(self
            .captures
            .iter()
            .find(|(pattern, _)| matches(pattern, invocation))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default())
    }

    fn hand_off(&self, invocation: &Invocation, handoff: &Handoff) -> Result<i32, CommandError> {
        self.handoffs
            .borrow_mut()
            .push((invocation.clone(), *handoff));
        if let Some(err) = self.failure_for(invocation) {
            return Err(err);
        }
        Ok(self.server_exit)
    }

    fn locate(&self, _name: &str, _fallback_dirs: &[PathBuf]) -> Option<PathBuf> {
        self.tool.borrow().clone()
    }
}

fn matches(pattern: &str, invocation: &Invocation) -> bool {
    let mut words = pattern.split_whitespace();
    let Some(program) = words.next() else {
        return false;
    };
    if invocation.display_program() != program {
        return false;
    }
    words.all(|word| invocation.args.iter().any(|arg| arg == word))
}

fn render(invocation: &Invocation) -> String {
    let mut parts = vec![invocation.display_program()];
    let mut args = invocation.args.iter();
    while let Some(arg) = args.next() {
        if arg == "-C" {
            args.next();
            continue;
        }
        parts.push(arg.to_string_lossy().into_owned());
    }
    parts.join(" ")
}

#[cfg(unix)]
fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(code as u32)
}
