//! Terminal handoff from the launcher to the server process.
//!
//! `Exec` replaces the launcher's process image, so the server inherits its
//! pid, stdio and parent. Platforms without `exec` fall back to `Supervise`:
//! the server runs as a child, terminating signals are forwarded to it, and
//! its exit status becomes ours.

use std::io::{self, Write};
use std::process::ExitStatus;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::CommandError;
use crate::process::{Invocation, spawn_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffMode {
    #[default]
    Exec,
    Supervise,
}

impl HandoffMode {
    /// `Exec` is only honored where the OS can replace a process image.
    pub fn effective(self) -> Self {
        if cfg!(unix) { self } else { HandoffMode::Supervise }
    }
}

/// How the launcher gives up control to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub mode: HandoffMode,
    /// Grace period before a forwarded termination escalates to a kill.
    pub shutdown_timeout: Duration,
}

impl Default for Handoff {
    fn default() -> Self {
        Self {
            mode: HandoffMode::Exec,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

pub fn hand_off(invocation: &Invocation, handoff: &Handoff) -> Result<i32, CommandError> {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    match handoff.mode.effective() {
        HandoffMode::Exec => exec(invocation, handoff),
        HandoffMode::Supervise => supervise(invocation, handoff.shutdown_timeout),
    }
}

#[cfg(unix)]
fn exec(invocation: &Invocation, _handoff: &Handoff) -> Result<i32, CommandError> {
    use std::os::unix::process::CommandExt;

    let program = invocation.display_program();
    // Only returns if the image could not be replaced.
    let err = invocation.to_command().exec();
    Err(spawn_error(&program, err))
}

#[cfg(not(unix))]
fn exec(invocation: &Invocation, handoff: &Handoff) -> Result<i32, CommandError> {
    supervise(invocation, handoff.shutdown_timeout)
}

#[cfg(unix)]
fn supervise(invocation: &Invocation, shutdown_timeout: Duration) -> Result<i32, CommandError> {
    use std::sync::{Arc, Mutex, PoisonError};
    use std::thread;

    use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::iterator::Signals;

    let program = invocation.display_program();

    // The terminal delivers SIGINT/SIGQUIT to the whole foreground group, so
    // the child already gets them; registering only keeps us alive. The
    // child stays in our group for that reason, which means forwarded
    // signals and the kill reach its pid only: workers it spawns without
    // their own shutdown handling can outlive it.
    let mut signals = Signals::new([SIGTERM, SIGHUP, SIGINT, SIGQUIT])
        .map_err(|source| spawn_error(&program, source))?;
    let handle = signals.handle();

    let mut child = invocation
        .to_command()
        .spawn()
        .map_err(|source| spawn_error(&program, source))?;
    let pid = child.id() as libc::pid_t;
    info!(pid, "server started under supervision");

    // Set while the exited child is still a zombie, so the pid cannot have
    // been reused by the time anyone holding the lock reads `false`.
    let exited = Arc::new(Mutex::new(false));
    let forwarder = {
        let exited = Arc::clone(&exited);
        thread::spawn(move || {
            for signal in signals.forever() {
                if signal == SIGINT || signal == SIGQUIT {
                    continue;
                }
                {
                    let exited = exited.lock().unwrap_or_else(PoisonError::into_inner);
                    if *exited {
                        break;
                    }
                    warn!(signal, pid, "forwarding signal to server");
                    // SAFETY: plain kill(2) on our unreaped child.
                    unsafe {
                        libc::kill(pid, signal);
                    }
                }

                let exited = Arc::clone(&exited);
                thread::spawn(move || {
                    thread::sleep(shutdown_timeout);
                    let exited = exited.lock().unwrap_or_else(PoisonError::into_inner);
                    if !*exited {
                        warn!(pid, "server ignored shutdown signal, killing");
                        // SAFETY: as above.
                        unsafe {
                            libc::kill(pid, libc::SIGKILL);
                        }
                    }
                });
            }
        })
    };

    if let Err(err) = wait_without_reaping(pid) {
        warn!(pid, error = %err, "waiting for server exit");
    }
    *exited.lock().unwrap_or_else(PoisonError::into_inner) = true;
    let status = child.wait();
    handle.close();
    let _ = forwarder.join();

    let status = status.map_err(|source| spawn_error(&program, source))?;
    Ok(exit_code_of(status))
}

/// Block until `pid` exits, leaving it to be reaped by `Child::wait`.
#[cfg(unix)]
fn wait_without_reaping(pid: libc::pid_t) -> io::Result<()> {
    loop {
        // SAFETY: siginfo_t is plain data that waitid(2) fills in.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: `info` outlives the call; WNOWAIT leaves the child waitable.
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn supervise(invocation: &Invocation, _shutdown_timeout: Duration) -> Result<i32, CommandError> {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    let program = invocation.display_program();

    // Ctrl-C reaches every process on the console; the flag only stops it
    // from terminating us before the server has exited.
    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))
        .map_err(|source| spawn_error(&program, source))?;

    let status = invocation
        .to_command()
        .status()
        .map_err(|source| spawn_error(&program, source))?;
    Ok(exit_code_of(status))
}

/// Exit code to propagate for a finished server: its own code, or the shell
/// convention `128 + signal` when it was killed.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
