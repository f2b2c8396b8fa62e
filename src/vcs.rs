//! Git operations on the installation checkout.
//!
//! Every function shells out to the system `git` binary through a
//! [`CommandRunner`]. Prompts are disabled so a missing credential fails the
//! launch instead of blocking on a terminal that may belong to an MCP client.

use std::path::Path;

use tracing::{debug, instrument};

use crate::error::LaunchError;
use crate::process::{CommandRunner, Invocation};

const GIT: &str = "git";

/// Local and upstream commit of the checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revisions {
    pub local: String,
    pub upstream: String,
}

impl Revisions {
    pub fn is_current(&self) -> bool {
        self.local == self.upstream
    }
}

fn git() -> Invocation {
    Invocation::new(GIT).env("GIT_TERMINAL_PROMPT", "0")
}

fn git_in(repo: &Path) -> Invocation {
    git().arg("-C").arg(repo)
}

fn vcs_error(step: &'static str) -> impl FnOnce(crate::error::CommandError) -> LaunchError {
    move |source| LaunchError::Vcs { step, source }
}

// ---------------------------------------------------------------------------
// Clone
// ---------------------------------------------------------------------------

/// Run `git clone --depth 1 [--branch <branch>] <url> <dest>`.
#[instrument(skip(runner, dest), fields(dest = %dest.display()))]
pub fn clone_shallow(
    runner: &dyn CommandRunner,
    url: &str,
    branch: Option<&str>,
    dest: &Path,
) -> Result<(), LaunchError> {
    let mut invocation = git().args(["clone", "--depth", "1"]);
    if let Some(branch) = branch {
        invocation = invocation.arg("--branch").arg(branch);
    }
    let invocation = invocation.arg(url).arg(dest);

    runner.run(&invocation).map_err(vcs_error("clone"))?;
    debug!("git clone succeeded");
    Ok(())
}

// ---------------------------------------------------------------------------
// Fetch / compare
// ---------------------------------------------------------------------------

/// Update remote-tracking refs without touching the work tree.
#[instrument(skip(runner, repo), fields(repo = %repo.display()))]
pub fn fetch(runner: &dyn CommandRunner, repo: &Path) -> Result<(), LaunchError> {
    runner
        .run(&git_in(repo).args(["fetch", "--quiet"]))
        .map_err(vcs_error("fetch"))
}

pub fn revision(
    runner: &dyn CommandRunner,
    repo: &Path,
    rev: &str,
) -> Result<String, LaunchError> {
    runner
        .capture(&git_in(repo).args(["rev-parse", rev]))
        .map_err(vcs_error("rev-parse"))
}

/// Resolve `HEAD` and its upstream (`@{u}`). Call after [`fetch`].
pub fn revisions(runner: &dyn CommandRunner, repo: &Path) -> Result<Revisions, LaunchError> {
    Ok(Revisions {
        local: revision(runner, repo, "HEAD")?,
        upstream: revision(runner, repo, "@{u}")?,
    })
}

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

#[instrument(skip(runner, repo), fields(repo = %repo.display()))]
pub fn pull_fast_forward(runner: &dyn CommandRunner, repo: &Path) -> Result<(), LaunchError> {
    runner
        .run(&git_in(repo).args(["pull", "--ff-only", "--quiet"]))
        .map_err(vcs_error("pull"))
}

/// Abbreviated commit for log lines.
pub fn short(rev: &str) -> &str {
    rev.get(..12).unwrap_or(rev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use pretty_assertions::assert_eq;
    use std::ffi::OsString;

    fn args_of(inv: &Invocation) -> Vec<String> {
        inv.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn clone_is_shallow_and_honors_branch() {
        let runner = FakeRunner::default();
        clone_shallow(
            &runner,
            "https://git.test/server.git",
            Some("release"),
            Path::new("/tmp/stage/checkout"),
        )
        .unwrap();

        let calls = runner.calls();
        assert_eq!(
            args_of(&calls[0]),
            vec![
                "clone",
                "--depth",
                "1",
                "--branch",
                "release",
                "https://git.test/server.git",
                "/tmp/stage/checkout",
            ]
        );
        assert_eq!(
            calls[0].value_of_env("GIT_TERMINAL_PROMPT"),
            Some(OsString::from("0").as_os_str())
        );
    }

    #[test]
    fn revisions_resolve_head_and_upstream() {
        let runner = FakeRunner::default().with_revisions("aaa111", "bbb222");

        let revs = revisions(&runner, Path::new("/srv/mcp")).unwrap();

        assert_eq!(revs.local, "aaa111");
        assert_eq!(revs.upstream, "bbb222");
        assert!(!revs.is_current());
        assert_eq!(
            args_of(&runner.calls()[1]),
            vec!["-C", "/srv/mcp", "rev-parse", "@{u}"]
        );
    }

    #[test]
    fn failed_clone_is_a_vcs_error() {
        let runner = FakeRunner::default().failing_on("git clone", 128);

        let err = clone_shallow(&runner, "https://git.test/x.git", None, Path::new("/tmp/x"))
            .unwrap_err();

        assert!(matches!(err, LaunchError::Vcs { step: "clone", .. }));
    }

    #[test]
    fn short_revision_handles_short_input() {
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
    }
}
