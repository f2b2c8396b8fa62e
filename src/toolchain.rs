use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::LaunchError;
use crate::model::config::LauncherConfig;
use crate::process::{CommandRunner, Invocation};

pub const TOOL_NAME: &str = "uv";

/// Resolved location of the package tool. Every `uv` call goes through this
/// path instead of relying on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub uv: PathBuf,
}

impl Toolchain {
    pub fn command(&self) -> Invocation {
        Invocation::new(&self.uv)
    }
}

/// Where the tool is installed from and to.
#[derive(Debug, Clone)]
pub struct ToolSource {
    pub install_dir: PathBuf,
    pub installer_url: String,
    /// Downloads the installer script.
    pub fetch: fn(&str) -> Result<String, LaunchError>,
}

impl ToolSource {
    pub fn from_config(config: &LauncherConfig) -> Self {
        Self {
            install_dir: config.tool_install_dir(),
            installer_url: config.installer_url().to_string(),
            fetch: fetch_installer,
        }
    }
}

pub fn ensure_tool_available(
    runner: &dyn CommandRunner,
    source: &ToolSource,
) -> Result<Toolchain, LaunchError> {
    ensure_tool_available_with(runner, source, source.fetch)
}

/// Like [`ensure_tool_available`] with the installer download supplied by the
/// caller.
pub fn ensure_tool_available_with<F>(
    runner: &dyn CommandRunner,
    source: &ToolSource,
    fetch: F,
) -> Result<Toolchain, LaunchError>
where
    F: FnOnce(&str) -> Result<String, LaunchError>,
{
    let search = [source.install_dir.clone()];
    if let Some(uv) = runner.locate(TOOL_NAME, &search) {
        debug!(path = %uv.display(), "package tool found");
        return Ok(Toolchain { uv });
    }

    info!(url = %source.installer_url, "installing {TOOL_NAME}");
    let script = fetch(&source.installer_url)?;
    run_installer(runner, source, &script)?;

    let uv = runner
        .locate(TOOL_NAME, &search)
        .ok_or_else(|| LaunchError::ToolUnavailable {
            tool: TOOL_NAME.to_string(),
        })?;
    info!(path = %uv.display(), "{TOOL_NAME} installed");
    Ok(Toolchain { uv })
}

pub fn fetch_installer(url: &str) -> Result<String, LaunchError> {
    reqwest::blocking::get(url)
        .and_then(reqwest::blocking::Response::error_for_status)
        .and_then(reqwest::blocking::Response::text)
        .map_err(|source| LaunchError::ToolDownload {
            url: url.to_string(),
            source,
        })
}

fn run_installer(
    runner: &dyn CommandRunner,
    source: &ToolSource,
    script: &str,
) -> Result<(), LaunchError> {
    let suffix = if cfg!(windows) { ".ps1" } else { ".sh" };
    let mut file = tempfile::Builder::new()
        .prefix("uv-installer")
        .suffix(suffix)
        .tempfile()
        .map_err(|err| LaunchError::io("creating installer script", err))?;
    file.write_all(script.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|err| LaunchError::io("writing installer script", err))?;

    let invocation = installer_invocation(file.path().to_path_buf())
        .env("UV_INSTALL_DIR", &source.install_dir)
        .env("UV_NO_MODIFY_PATH", "1");

    runner.run(&invocation).map_err(LaunchError::ToolInstall)
}

fn installer_invocation(script: PathBuf) -> Invocation {
    if cfg!(windows) {
        Invocation::new("powershell")
            .args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"])
            .arg(script)
    } else {
        Invocation::new("sh").arg(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    fn source() -> ToolSource {
        ToolSource {
            install_dir: PathBuf::from("/home/dev/.local/bin"),
            installer_url: "https://installer.test/uv.sh".to_string(),
            fetch: |_| Ok(String::new()),
        }
    }

    #[test]
    fn present_tool_skips_installer() {
        let runner = FakeRunner::default().with_tool("/usr/bin/uv");

        let toolchain = ensure_tool_available_with(&runner, &source(), |_| {
            panic!("installer must not be fetched")
        })
        .unwrap();

        assert_eq!(toolchain.uv, PathBuf::from("/usr/bin/uv"));
        assert!(runner.calls().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn missing_tool_is_installed_into_configured_dir() {
        let runner = FakeRunner::default().installing_tool_at("/home/dev/.local/bin/uv");

        let toolchain = ensure_tool_available_with(&runner, &source(), |url| {
            assert_eq!(url, "https://installer.test/uv.sh");
            Ok("#!/bin/sh\nexit 0\n".to_string())
        })
        .unwrap();

        assert_eq!(toolchain.uv, PathBuf::from("/home/dev/.local/bin/uv"));
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].display_program(), "sh");
        assert_eq!(
            calls[0].value_of_env("UV_INSTALL_DIR"),
            Some(std::ffi::OsStr::new("/home/dev/.local/bin"))
        );
        assert_eq!(
            calls[0].value_of_env("UV_NO_MODIFY_PATH"),
            Some(std::ffi::OsStr::new("1"))
        );
    }

    #[test]
    fn download_failure_is_fatal() {
        let runner = FakeRunner::default();

        let err = ensure_tool_available_with(&runner, &source(), |_| {
            Err(LaunchError::io("fetching installer", std::io::Error::other("offline")))
        })
        .unwrap_err();

        assert!(matches!(err, LaunchError::Io { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn installer_that_leaves_no_tool_is_reported() {
        let runner = FakeRunner::default();

        let err = ensure_tool_available_with(&runner, &source(), |_| Ok(String::new())).unwrap_err();

        assert!(matches!(err, LaunchError::ToolUnavailable { .. }));
    }

    #[test]
    fn failing_installer_carries_its_status() {
        let runner = FakeRunner::default().failing_on("sh", 7).failing_on("powershell", 7);

        let err = ensure_tool_available_with(&runner, &source(), |_| Ok(String::new())).unwrap_err();

        assert!(matches!(err, LaunchError::ToolInstall(_)));
        assert_eq!(err.exit_code(), 7);
    }
}
