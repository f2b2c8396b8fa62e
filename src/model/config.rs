use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::handoff::HandoffMode;

const DEFAULTS: &str = include_str!("../../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct LauncherConfig {
    pub install: InstallConfig,
    pub toolchain: ToolchainConfig,
    pub update: UpdateConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallConfig {
    pub dir: PathBuf,
    pub repo_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub venv_dir: String,
    /// Dependency manifest, relative to the checkout.
    pub requirements: String,
    #[serde(default)]
    pub python: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolchainConfig {
    pub install_dir: PathBuf,
    pub installer_url: String,
    pub windows_installer_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub module: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub handoff: HandoffMode,
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub passthrough_env: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl LauncherConfig {
    /// Load configuration with layering: defaults → user config.
    pub fn load() -> Result<Self> {
        let user = match user_config_path() {
            Some(path) if path.exists() => Some(
                fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
            ),
            _ => None,
        };

        let home = dirs_home().ok_or_else(|| anyhow!("cannot determine home directory"))?;
        Self::from_layers(user.as_deref(), &home)
    }

    /// Merge `user` over the embedded defaults key by key, then expand `~`
    /// against `home`.
    pub fn from_layers(user: Option<&str>, home: &Path) -> Result<Self> {
        let mut merged: toml::Table = toml::from_str(DEFAULTS).context("parsing default config")?;
        if let Some(user) = user {
            let overrides: toml::Table = toml::from_str(user).context("parsing user config")?;
            merge_tables(&mut merged, overrides);
        }

        let mut config: LauncherConfig = toml::Value::Table(merged)
            .try_into()
            .context("invalid launcher config")?;

        config.install.branch = config.install.branch.filter(|b| !b.is_empty());
        config.install.python = config.install.python.filter(|p| !p.is_empty());
        config.install.dir = expand_tilde(&config.install.dir, home);
        config.toolchain.install_dir = expand_tilde(&config.toolchain.install_dir, home);

        if config.install.repo_url.trim().is_empty() {
            return Err(anyhow!("install.repo_url must not be empty"));
        }
        if config.server.module.trim().is_empty() {
            return Err(anyhow!("server.module must not be empty"));
        }

        Ok(config)
    }

    pub fn install_dir(&self) -> PathBuf {
        self.install.dir.clone()
    }

    pub fn tool_install_dir(&self) -> PathBuf {
        self.toolchain.install_dir.clone()
    }

    pub fn installer_url(&self) -> &str {
        if cfg!(windows) {
            &self.toolchain.windows_installer_url
        } else {
            &self.toolchain.installer_url
        }
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "mcp-launcher")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// `~` and `~/...` resolve under `home`; `~user` forms are left alone.
fn expand_tilde(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) if rest.as_os_str().is_empty() => home.to_path_buf(),
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
