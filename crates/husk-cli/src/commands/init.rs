//! `husk init` — the container's first process.
//!
//! Runs inside the new namespaces, reads the command from the handshake
//! pipe, switches root, and replaces itself with the user program.

use husk_core::filesystem::HostSyscalls;
use husk_core::namespace::init::ContainerInit;

/// Executes the `init` command. Only returns on failure.
///
/// # Errors
///
/// Returns an error if any step before `exec` fails.
pub fn execute() -> anyhow::Result<()> {
    let sys = HostSyscalls;
    match ContainerInit::new(&sys).run_from_handshake() {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!(error = %e, "container init failed");
            Err(e.into())
        }
    }
}
