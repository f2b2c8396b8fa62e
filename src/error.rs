use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Why a command invocation did not succeed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}")]
    Status { program: String, status: ExitStatus },
    #[error("{program} produced non-utf8 output")]
    Output { program: String },
}

impl CommandError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Status { status, .. } => status.code(),
            Self::Spawn { .. } | Self::Output { .. } => None,
        }
    }
}

/// Every way a launch can fail. All of them are fatal.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("package tool `{tool}` is not available after installation")]
    ToolUnavailable { tool: String },

    #[error("failed to download package tool installer from {url}: {source}")]
    ToolDownload {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("package tool installer failed: {0}")]
    ToolInstall(#[source] CommandError),

    #[error("git {step} failed: {source}")]
    Vcs {
        step: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("dependency {step} failed: {source}")]
    Dependency {
        step: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("failed to start server: {0}")]
    Handoff(#[source] CommandError),

    #[error(
        "{} exists but is not a complete installation and is not a git checkout; remove it and rerun",
        .path.display()
    )]
    Unrecoverable { path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Exit status the launcher should terminate with: the failing tool's own
    /// code when there is one, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        let code = match self {
            Self::ToolInstall(err) | Self::Handoff(err) => err.exit_code(),
            Self::Vcs { source, .. } | Self::Dependency { source, .. } => source.exit_code(),
            _ => None,
        };

        match code {
            Some(code) if code != 0 => code,
            _ => 1,
        }
    }
}
