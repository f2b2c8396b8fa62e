mod deps;
mod error;
mod handoff;
mod launcher;
mod model;
mod process;
mod toolchain;
mod vcs;

#[cfg(test)]
mod testing;

use std::ffi::OsString;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use error::LaunchError;
use launcher::Launcher;
use model::config::LauncherConfig;
use model::passthrough::PassthroughEnv;
use process::SystemRunner;

fn main() {
    // Status lines go to stderr; stdout belongs to the server.
    let filter = EnvFilter::try_from_env("MCP_LAUNCHER_LOG")
        .unwrap_or_else(|_| EnvFilter::new("mcp_launcher=info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("launch failed: {err:#}");
            exit_code_for(&err)
        }
    };

    std::process::exit(code);
}

fn run() -> Result<i32> {
    let config = LauncherConfig::load()?;
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    let passthrough = PassthroughEnv::from_process(&config.server.passthrough_env);

    let runner = SystemRunner;
    let launcher = Launcher::new(&config, &runner, passthrough);
    Ok(launcher.run(args)?)
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<LaunchError>()
        .map_or(1, LaunchError::exit_code)
}
