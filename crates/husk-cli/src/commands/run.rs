//! `husk run` — Create and run a container.

use std::process::ExitCode;

use anyhow::Context;
use clap::Args;
use husk_common::config::HuskConfig;
use husk_common::types::ResourceConfig;
use husk_runtime::{Launcher, RunOutcome, RunRequest};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Memory limit written verbatim to the cgroup (e.g. `100m`).
    #[arg(short = 'm', long = "memory")]
    pub memory: Option<String>,

    /// CPU shares (v1 `cpu.shares` scale).
    #[arg(long = "cpushare")]
    pub cpu_share: Option<String>,

    /// CPUs the container may run on (e.g. `0-1`).
    #[arg(long = "cpuset")]
    pub cpu_set: Option<String>,

    /// Container name; defaults to the generated ID.
    #[arg(long)]
    pub name: Option<String>,

    /// Extra environment entries, `KEY=VALUE`.
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Network to attach the container to.
    #[arg(long = "net")]
    pub network: Option<String>,

    /// Port forwards, `hostPort:containerPort`.
    #[arg(short = 'p', long = "publish", requires = "network")]
    pub publish: Vec<String>,

    /// Host directory to share, `hostDir:containerDir`.
    #[arg(short = 'v', long = "volume")]
    pub volume: Option<String>,

    /// Return once the container is started.
    #[arg(short, long)]
    pub detach: bool,

    /// Image name under the images directory, or a path to a rootfs.
    pub image: String,

    /// Program and arguments to run inside the container.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn into_request(self, config: &HuskConfig) -> RunRequest {
        let mut resources = ResourceConfig::default();
        if let Some(memory) = self.memory {
            resources = resources.with_memory_limit(memory);
        }
        if let Some(share) = self.cpu_share {
            resources = resources.with_cpu_share(share);
        }
        if let Some(set) = self.cpu_set {
            resources = resources.with_cpu_set(set);
        }
        RunRequest {
            name: self.name,
            image: config.resolve_image(&self.image),
            command: self.command,
            env: self.env,
            resources,
            network: self.network,
            port_mapping: self.publish,
            volume: self.volume,
            detach: self.detach,
        }
    }
}

/// Executes the `run` command.
///
/// In the foreground the container's exit code becomes the process exit
/// code.
///
/// # Errors
///
/// Returns an error if the container cannot be launched.
pub fn execute(config: &HuskConfig, args: RunArgs) -> anyhow::Result<ExitCode> {
    let launcher = Launcher::system(config.clone())?;
    let request = args.into_request(config);
    let outcome = launcher
        .run(&request)
        .with_context(|| format!("failed to run {}", request.image.display()))?;
    match outcome {
        RunOutcome::Detached(info) => {
            println!("{}", info.name);
            eprintln!("{}", crate::output::started(&info));
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Exited { info, code } => {
            tracing::debug!(container = %info.name, ?code, "foreground container finished");
            Ok(crate::output::exit_code(code))
        }
    }
}
