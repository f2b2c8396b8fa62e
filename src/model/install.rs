use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::LaunchError;
use crate::model::config::LauncherConfig;

/// Written last during setup; an install directory without it is incomplete.
pub const MARKER_FILE: &str = ".mcp-launcher-installed";

/// Name prefix of the directories clones are staged in.
pub const STAGING_PREFIX: &str = ".mcp-launcher-staging-";

/// Where the installation lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub venv_dir: PathBuf,
    pub requirements: PathBuf,
}

/// What the launcher found at the installation root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    /// Nothing at the root yet.
    NotInstalled,
    /// The root exists without its marker: setup or an update was cut short.
    Incomplete,
    Installed,
}

impl InstallState {
    pub fn label(&self) -> &'static str {
        match self {
            InstallState::NotInstalled => "not installed",
            InstallState::Incomplete => "incomplete",
            InstallState::Installed => "installed",
        }
    }
}

impl Layout {
    pub fn new(root: PathBuf, venv_dir: &str, requirements: &str) -> Self {
        Self {
            venv_dir: root.join(venv_dir),
            requirements: PathBuf::from(requirements),
            root,
        }
    }

    pub fn from_config(config: &LauncherConfig) -> Self {
        Self::new(
            config.install_dir(),
            &config.install.venv_dir,
            &config.install.requirements,
        )
    }

    pub fn interpreter(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir.join("Scripts").join("python.exe")
        } else {
            self.venv_dir.join("bin").join("python")
        }
    }

    pub fn marker(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    pub fn has_checkout(&self) -> bool {
        self.root.join(".git").exists()
    }

    pub fn has_environment(&self) -> bool {
        self.interpreter().is_file()
    }

    pub fn state(&self) -> InstallState {
        if !self.root.exists() {
            InstallState::NotInstalled
        } else if self.marker().is_file() {
            InstallState::Installed
        } else {
            InstallState::Incomplete
        }
    }

    pub fn write_marker(&self) -> Result<(), LaunchError> {
        fs::write(self.marker(), b"")
            .map_err(|err| LaunchError::io(format!("writing {}", self.marker().display()), err))
    }

    /// Withdraw the marker before a step that can leave the environment
    /// behind the checkout.
    pub fn clear_marker(&self) -> Result<(), LaunchError> {
        match fs::remove_file(self.marker()) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(LaunchError::io(
                format!("removing {}", self.marker().display()),
                err,
            )),
            _ => Ok(()),
        }
    }

    /// Delete staging directories left by clones that never finished.
    pub fn remove_stale_staging(&self) -> Result<(), LaunchError> {
        let parent = self.staging_parent();
        let entries = match fs::read_dir(parent) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(LaunchError::io(format!("reading {}", parent.display()), err));
            }
        };

        for entry in entries.flatten() {
            let stale = entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX);
            if stale && entry.path().is_dir() {
                warn!(path = %entry.path().display(), "removing interrupted clone");
                fs::remove_dir_all(entry.path()).map_err(|err| {
                    LaunchError::io(format!("removing {}", entry.path().display()), err)
                })?;
            }
        }
        Ok(())
    }

    /// Parent directory that staging clones are created in, so the final
    /// rename never crosses filesystems.
    pub fn staging_parent(&self) -> &Path {
        self.root
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}
