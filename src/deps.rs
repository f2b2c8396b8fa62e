use tracing::{info, instrument};

use crate::error::{CommandError, LaunchError};
use crate::model::install::Layout;
use crate::model::passthrough::PassthroughEnv;
use crate::process::{CommandRunner, Invocation};
use crate::toolchain::Toolchain;

/// Runs `uv` against one installation's dependency environment.
pub struct DependencyEnv<'a> {
    runner: &'a dyn CommandRunner,
    toolchain: &'a Toolchain,
    layout: &'a Layout,
    passthrough: &'a PassthroughEnv,
}

impl<'a> DependencyEnv<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        toolchain: &'a Toolchain,
        layout: &'a Layout,
        passthrough: &'a PassthroughEnv,
    ) -> Self {
        Self {
            runner,
            toolchain,
            layout,
            passthrough,
        }
    }

    /// `uv venv [--python <version>] <venv>`
    #[instrument(skip(self), fields(venv = %self.layout.venv_dir.display()))]
    pub fn create(&self, python: Option<&str>) -> Result<(), LaunchError> {
        let mut invocation = self.uv().arg("venv");
        if let Some(python) = python {
            invocation = invocation.arg("--python").arg(python);
        }
        let invocation = invocation.arg(&self.layout.venv_dir);

        self.runner
            .run(&invocation)
            .map_err(dependency_error("environment creation"))
    }

    /// Install everything the manifest declares on top of what is there.
    pub fn install(&self) -> Result<(), LaunchError> {
        info!(manifest = %self.layout.requirements.display(), "installing dependencies");
        let invocation = self
            .pip("install")
            .arg("-r")
            .arg(&self.layout.requirements);

        self.runner
            .run(&invocation)
            .map_err(dependency_error("install"))
    }

    /// Make the environment match the manifest exactly, removing anything it
    /// no longer declares.
    pub fn sync(&self) -> Result<(), LaunchError> {
        info!(manifest = %self.layout.requirements.display(), "syncing dependencies");
        let invocation = self.pip("sync").arg(&self.layout.requirements);

        self.runner.run(&invocation).map_err(dependency_error("sync"))
    }

    fn uv(&self) -> Invocation {
        self.toolchain
            .command()
            .current_dir(&self.layout.root)
            .envs(self.passthrough.iter())
    }

    fn pip(&self, subcommand: &str) -> Invocation {
        self.uv()
            .arg("pip")
            .arg(subcommand)
            .arg("--python")
            .arg(self.layout.interpreter())
    }
}

fn dependency_error(step: &'static str) -> impl FnOnce(CommandError) -> LaunchError {
    move |source| LaunchError::Dependency { step, source }
}
