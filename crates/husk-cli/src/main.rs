//! # husk
//!
//! Builds containers from raw Linux primitives: cgroups, namespaces,
//! `pivot_root`, and a bridge network. The same binary re-enters itself as
//! the container's init process.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;

use crate::commands::Cli;

fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr so the init process never writes into the
    // container program's stdout.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::execute(cli)
}
