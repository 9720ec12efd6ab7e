//! `husk stop` — Kill a detached container and clean up its resources.

use clap::Args;
use husk_common::config::HuskConfig;
use husk_runtime::Launcher;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Name of the container to stop.
    pub name: String,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or cleanup fails.
pub fn execute(config: &HuskConfig, args: &StopArgs) -> anyhow::Result<()> {
    let launcher = Launcher::system(config.clone())?;
    let info = launcher.stop(&args.name)?;
    eprintln!("{}", crate::output::stopped(&info));
    Ok(())
}
