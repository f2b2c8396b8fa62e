//! Orchestrates setup, update and handoff.
//!
//! ```text
//! NotInstalled ──setup──▶ Installed ◀──resume── Incomplete
//!                            │  ▲                     ▲
//!                            │  │ update check        │ pull or sync failed
//!                            │  └─(fetch, compare, ───┘
//!                            ▼     pull + sync)
//!                         hand off to server
//! ```
//!
//! The marker is withdrawn for the length of an update, so an update that
//! dies between pull and sync is finished by the next run's resume.
//!
//! Every step aborts the launch on its first error, so the server only ever
//! starts from a complete, current installation.

use std::ffi::OsString;
use std::fs;
use std::time::Duration;

use tracing::{info, warn};

use crate::deps::DependencyEnv;
use crate::error::LaunchError;
use crate::handoff::Handoff;
use crate::model::config::LauncherConfig;
use crate::model::install::{InstallState, Layout, STAGING_PREFIX};
use crate::model::passthrough::PassthroughEnv;
use crate::process::{CommandRunner, Invocation};
use crate::toolchain::{self, ToolSource, Toolchain};
use crate::vcs;

pub struct Launcher<'a> {
    config: &'a LauncherConfig,
    runner: &'a dyn CommandRunner,
    layout: Layout,
    tool_source: ToolSource,
    passthrough: PassthroughEnv,
}

impl<'a> Launcher<'a> {
    pub fn new(
        config: &'a LauncherConfig,
        runner: &'a dyn CommandRunner,
        passthrough: PassthroughEnv,
    ) -> Self {
        Self {
            config,
            runner,
            layout: Layout::from_config(config),
            tool_source: ToolSource::from_config(config),
            passthrough,
        }
    }

    #[cfg(test)]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Bring the installation up to date and hand off to the server with
    /// `args`. Returns the exit code to terminate with.
    pub fn run(&self, args: Vec<OsString>) -> Result<i32, LaunchError> {
        let state = self.layout.state();
        info!(dir = %self.layout.root.display(), state = state.label(), "installation");

        match state {
            InstallState::NotInstalled => self.first_time_setup()?,
            InstallState::Incomplete => self.resume_setup()?,
            InstallState::Installed => {}
        }

        if self.config.update.enabled {
            self.check_and_apply_update()?;
        } else {
            info!("update check disabled");
        }

        self.launch_server(args)
    }

    pub fn ensure_tool_available(&self) -> Result<Toolchain, LaunchError> {
        toolchain::ensure_tool_available(self.runner, &self.tool_source)
    }

    pub fn first_time_setup(&self) -> Result<(), LaunchError> {
        info!("performing first-time setup");
        let toolchain = self.ensure_tool_available()?;
        self.clone_into_place()?;

        let env = self.dependency_env(&toolchain);
        env.create(self.config.install.python.as_deref())?;
        env.install()?;

        self.layout.write_marker()?;
        info!("first-time setup complete");
        Ok(())
    }

    /// Finish a setup that was interrupted after the checkout landed.
    pub fn resume_setup(&self) -> Result<(), LaunchError> {
        if !self.layout.has_checkout() {
            return Err(LaunchError::Unrecoverable {
                path: self.layout.root.clone(),
            });
        }

        warn!("resuming incomplete installation");
        let toolchain = self.ensure_tool_available()?;
        let env = self.dependency_env(&toolchain);
        if self.layout.has_environment() {
            env.sync()?;
        } else {
            env.create(self.config.install.python.as_deref())?;
            env.install()?;
        }

        self.layout.write_marker()?;
        Ok(())
    }

    pub fn check_and_apply_update(&self) -> Result<(), LaunchError> {
        info!("checking for updates");
        let root = &self.layout.root;

        vcs::fetch(self.runner, root)?;
        let revisions = vcs::revisions(self.runner, root)?;
        if revisions.is_current() {
            info!(revision = vcs::short(&revisions.local), "already up to date");
            return Ok(());
        }

        info!(
            from = vcs::short(&revisions.local),
            to = vcs::short(&revisions.upstream),
            "applying update"
        );
        self.layout.clear_marker()?;
        vcs::pull_fast_forward(self.runner, root)?;

        let toolchain = self.ensure_tool_available()?;
        self.dependency_env(&toolchain).sync()?;
        self.layout.write_marker()
    }

    pub fn launch_server(&self, args: Vec<OsString>) -> Result<i32, LaunchError> {
        info!(module = %self.config.server.module, "starting server");
        let invocation = self.server_invocation(args);
        let handoff = Handoff {
            mode: self.config.server.handoff,
            shutdown_timeout: Duration::from_secs(self.config.server.shutdown_timeout_secs),
        };

        self.runner
            .hand_off(&invocation, &handoff)
            .map_err(LaunchError::Handoff)
    }

    /// `<venv python> -m <module> <configured args> <launcher args>`
    pub fn server_invocation(&self, args: Vec<OsString>) -> Invocation {
        let server = &self.config.server;
        Invocation::new(self.layout.interpreter())
            .arg("-m")
            .arg(&server.module)
            .args(&server.args)
            .args(args)
            .current_dir(&self.layout.root)
            .envs(self.passthrough.iter())
            .envs(&server.env)
    }

    /// Clone into a staging directory beside the install root and rename it
    /// into place, so an interrupted clone never shows up at the root.
    fn clone_into_place(&self) -> Result<(), LaunchError> {
        let parent = self.layout.staging_parent();
        fs::create_dir_all(parent)
            .map_err(|err| LaunchError::io(format!("creating {}", parent.display()), err))?;
        self.layout.remove_stale_staging()?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(|err| LaunchError::io("creating staging directory", err))?;
        let checkout = staging.path().join("checkout");

        vcs::clone_shallow(
            self.runner,
            &self.config.install.repo_url,
            self.config.install.branch.as_deref(),
            &checkout,
        )?;

        fs::rename(&checkout, &self.layout.root).map_err(|err| {
            LaunchError::io(
                format!("moving checkout to {}", self.layout.root.display()),
                err,
            )
        })
    }

    fn dependency_env<'t>(&'t self, toolchain: &'t Toolchain) -> DependencyEnv<'t> {
        DependencyEnv::new(self.runner, toolchain, &self.layout, &self.passthrough)
    }
}
