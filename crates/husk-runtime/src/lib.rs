//! Container launch orchestration for the husk runtime.
//!
//! Sequences the overlay workspace, the namespaced init process, cgroup
//! limits, network attachment and the command handshake, and tears all of
//! it down again.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod launcher;
pub mod process;
pub mod record;
pub mod workspace;

pub use launcher::{Launcher, RunOutcome, RunRequest};
pub use process::{HostProcesses, InitProcess, ProcessOps};
pub use record::ContainerStore;
pub use workspace::{Volume, Workspace};
