//! Spawning the container's init process.
//!
//! The host clones itself into fresh namespaces; the child moves the
//! handshake pipe onto [`HANDSHAKE_FD`], changes into the container rootfs
//! and re-executes `/proc/self/exe init`, which blocks on the pipe until the
//! host has finished cgroup and network setup.

use std::ffi::{CString, OsString};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, Instant};

use husk_common::constants::{HANDSHAKE_FD, INIT_SUBCOMMAND, SELF_EXE};
use husk_common::error::{HuskError, Result};
use husk_core::namespace::NamespaceConfig;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

/// Stack size handed to `clone(2)` for the child.
const STACK_SIZE: usize = 1024 * 1024;

/// How long [`ProcessOps::wait`] polls a process that is not our child.
pub const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit status the child uses when it cannot reach `exec`.
const SETUP_FAILED: isize = 126;

/// A freshly cloned init process still waiting for its command.
#[derive(Debug)]
pub struct InitProcess {
    /// Host PID of the init process.
    pub pid: u32,
    /// Write end of the handshake pipe.
    pub handshake: OwnedFd,
}

/// Process-level operations the launcher performs on the host.
pub trait ProcessOps: Send + Sync {
    /// Clones an init process rooted at `rootfs` with `env` (`KEY=VALUE`)
    /// added to the inherited environment; an entry in `env` replaces an
    /// inherited one with the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe or the clone cannot be created.
    fn spawn(&self, rootfs: &Path, env: &[String]) -> Result<InitProcess>;

    /// Sends `SIGKILL` to `pid`; a process that is already gone is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Kernel`] if the signal cannot be sent.
    fn kill(&self, pid: u32) -> Result<()>;

    /// Waits for `pid` to exit.
    ///
    /// Returns the exit code when `pid` is a child of this process, where a
    /// process killed by a signal reports `128 + signal`. Any other process
    /// is polled until it is gone and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Kernel`] if waiting fails, or if a foreign
    /// process outlives [`EXIT_TIMEOUT`].
    fn wait(&self, pid: u32) -> Result<Option<i32>>;
}

/// [`ProcessOps`] backed by the real kernel.
#[derive(Debug, Clone, Default)]
pub struct HostProcesses {
    namespaces: NamespaceConfig,
}

impl HostProcesses {
    /// Spawns init processes into the namespaces selected by `namespaces`.
    #[must_use]
    pub const fn new(namespaces: NamespaceConfig) -> Self {
        Self { namespaces }
    }
}

impl ProcessOps for HostProcesses {
    fn spawn(&self, rootfs: &Path, env: &[String]) -> Result<InitProcess> {
        let exe = cstring(SELF_EXE)?;
        let argv = [exe.clone(), cstring(INIT_SUBCOMMAND)?];
        let envp = environment(std::env::vars_os(), env)?;
        let root = cstring(rootfs.as_os_str().as_bytes())?;
        // The child must not allocate, so the pointer arrays exist up front.
        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);

        let (reader, writer) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| HuskError::kernel("create handshake pipe", e))?;
        let read_fd = reader.as_raw_fd();

        let child = Box::new(|| -> isize {
            // SAFETY: only async-signal-safe libc calls on fds, strings and
            // pointer arrays prepared before the clone, all of which outlive
            // it. `dup2` clears FD_CLOEXEC on the copy; when the pipe already
            // sits on the handshake fd the flag is cleared directly.
            unsafe {
                let moved = if read_fd == HANDSHAKE_FD {
                    libc::fcntl(read_fd, libc::F_SETFD, 0)
                } else {
                    libc::dup2(read_fd, HANDSHAKE_FD)
                };
                if moved < 0 || libc::chdir(root.as_ptr()) != 0 {
                    return SETUP_FAILED;
                }
                let _ = libc::execve(exe.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
            }
            SETUP_FAILED + 1
        });

        let mut stack = vec![0_u8; STACK_SIZE];
        // SAFETY: the child runs in a separate address space (no CLONE_VM)
        // and only touches data captured by the callback.
        let pid = unsafe {
            nix::sched::clone(
                child,
                &mut stack,
                self.namespaces.clone_flags(),
                Some(libc::SIGCHLD),
            )
        }
        .map_err(|e| HuskError::kernel("clone init process", e))?;
        drop(reader);

        let pid = u32::try_from(pid.as_raw()).map_err(|_| HuskError::Config {
            message: format!("clone returned an invalid pid {pid}"),
        })?;
        tracing::info!(pid, rootfs = %rootfs.display(), "init process cloned");
        Ok(InitProcess {
            pid,
            handshake: writer,
        })
    }

    fn kill(&self, pid: u32) -> Result<()> {
        match kill(to_pid(pid)?, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(HuskError::kernel(format!("kill {pid}"), e)),
        }
    }

    fn wait(&self, pid: u32) -> Result<Option<i32>> {
        let target = to_pid(pid)?;
        loop {
            match waitpid(target, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(Some(code)),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(Some(128 + signal as i32)),
                Ok(_) | Err(Errno::EINTR) => {}
                Err(Errno::ECHILD) => return poll_gone(target).map(|()| None),
                Err(e) => return Err(HuskError::kernel(format!("wait for {pid}"), e)),
            }
        }
    }
}

/// Polls with signal 0 until `pid` no longer exists.
fn poll_gone(pid: Pid) -> Result<()> {
    let deadline = Instant::now() + EXIT_TIMEOUT;
    while kill(pid, None).is_ok() {
        if Instant::now() >= deadline {
            return Err(HuskError::kernel(
                format!("wait for {pid}"),
                std::io::Error::from(std::io::ErrorKind::TimedOut),
            ));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

/// Builds the init environment: `inherited` followed by `extra`, where a
/// later entry replaces any earlier one with the same key.
fn environment(
    inherited: impl IntoIterator<Item = (OsString, OsString)>,
    extra: &[String],
) -> Result<Vec<CString>> {
    let mut entries: Vec<Vec<u8>> = Vec::new();
    let inherited = inherited.into_iter().map(|(k, v)| {
        let mut entry = k.as_bytes().to_vec();
        entry.push(b'=');
        entry.extend_from_slice(v.as_bytes());
        entry
    });
    for entry in inherited.chain(extra.iter().map(|e| e.as_bytes().to_vec())) {
        let key_end = entry
            .iter()
            .position(|&b| b == b'=')
            .map_or(entry.len(), |i| i + 1);
        let key = &entry[..key_end];
        entries.retain(|existing| !existing.starts_with(key));
        entries.push(entry);
    }
    entries.into_iter().map(cstring).collect()
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn to_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| HuskError::Config {
            message: format!("pid out of range: {pid}"),
        })
}

fn cstring(bytes: impl Into<Vec<u8>>) -> Result<CString> {
    CString::new(bytes).map_err(|e| HuskError::Config {
        message: format!("value contains a NUL byte: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_beyond_i32_are_rejected() {
        assert!(to_pid(u32::MAX).is_err());
        assert_eq!(to_pid(42).unwrap(), Pid::from_raw(42));
    }

    #[test]
    fn nul_bytes_cannot_reach_the_environment() {
        assert!(matches!(cstring("A=\0"), Err(HuskError::Config { .. })));
        assert_eq!(cstring("A=1").unwrap().as_bytes(), b"A=1");
    }

    fn env_of(entries: &[(&str, &str)], extra: &[&str]) -> Vec<String> {
        let inherited = entries
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)));
        let extra: Vec<String> = extra.iter().map(ToString::to_string).collect();
        environment(inherited, &extra)
            .unwrap()
            .into_iter()
            .map(|c| c.into_string().unwrap())
            .collect()
    }

    #[test]
    fn extra_entries_replace_inherited_ones() {
        let env = env_of(
            &[("HOME", "/host"), ("PATH", "/usr/bin"), ("HOMEDIR", "/x")],
            &["HOME=/override", "MODE=test"],
        );
        assert_eq!(env, vec!["PATH=/usr/bin", "HOMEDIR=/x", "HOME=/override", "MODE=test"]);
    }

    #[test]
    fn last_extra_entry_wins() {
        let env = env_of(&[], &["A=1", "B=2", "A=3"]);
        assert_eq!(env, vec!["B=2", "A=3"]);
    }

    #[test]
    fn pointer_arrays_end_in_null() {
        let strings = [cstring("a").unwrap(), cstring("b").unwrap()];
        let ptrs = null_terminated(&strings);
        assert_eq!(ptrs.len(), 3);
        assert_eq!(ptrs[0], strings[0].as_ptr());
        assert!(ptrs[2].is_null());
    }

    #[test]
    fn waiting_on_a_child_reports_its_exit_code() {
        let child = std::process::Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        let code = HostProcesses::default().wait(child.id()).unwrap();
        assert_eq!(code, Some(3));
    }
}
