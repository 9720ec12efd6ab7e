//! CLI command definitions and dispatch.

pub mod init;
pub mod network;
pub mod run;
pub mod stop;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use husk_common::config::HuskConfig;
use husk_common::constants::RUN_DIR_ENV;

/// husk — containers from raw Linux primitives.
#[derive(Parser, Debug)]
#[command(name = "husk", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Keep all state under this directory instead of the system defaults.
    #[arg(long, global = true, env = RUN_DIR_ENV)]
    pub root: Option<PathBuf>,
}

impl Cli {
    /// Directory layout selected by `--root`.
    #[must_use]
    pub fn config(&self) -> HuskConfig {
        self.root
            .as_deref()
            .map_or_else(HuskConfig::default, HuskConfig::from_root)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and run a container.
    Run(run::RunArgs),
    /// Kill a detached container and remove its resources.
    Stop(stop::StopArgs),
    /// Manage container networks.
    Network(network::NetworkArgs),
    /// Container init process; invoked by `run`, never by hand.
    #[command(hide = true)]
    Init,
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.config();
    match cli.command {
        Command::Run(args) => run::execute(&config, args),
        Command::Stop(args) => stop::execute(&config, &args).map(|()| ExitCode::SUCCESS),
        Command::Network(args) => network::execute(&config, args).map(|()| ExitCode::SUCCESS),
        Command::Init => init::execute().map(|()| ExitCode::SUCCESS),
    }
}
