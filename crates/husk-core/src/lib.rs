//! # husk-core
//!
//! Low-level Linux isolation primitives for the husk runtime.
//!
//! This crate provides safe abstractions over:
//! - **Cgroups**: per-subsystem resource limits (memory, cpu shares, cpu set)
//!   on v1 hierarchies, with a v2 unified-hierarchy fallback.
//! - **Filesystem**: the `pivot_root` root switch, `/proc` and `/dev`
//!   remounts, and the overlay mount that assembles a container rootfs.
//! - **Namespaces**: clone flags, the host-to-init handshake, the in-container
//!   init sequence, and the thread-scoped network namespace switch.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
