//! Network namespace entry.
//!
//! `setns(2)` switches the namespace of the calling *thread* only, so a
//! switch must never be observed by unrelated work that happens to share the
//! thread. [`run_in_netns`] runs the wrapped calls on a dedicated scoped
//! thread, and [`NetnsGuard`] is `!Send` so it cannot leave the thread that
//! entered the namespace. Child processes spawned from that thread inherit
//! the container namespace.

use std::fs::File;
use std::marker::PhantomData;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;

use husk_common::error::{HuskError, Result};
use nix::sched::CloneFlags;

/// Kernel operations on network namespace handles.
pub trait NetnsOps: Send + Sync {
    /// Opens the calling thread's current network namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace file cannot be opened.
    fn open_current(&self) -> Result<OwnedFd>;

    /// Opens the network namespace of process `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process does not exist or cannot be inspected.
    fn open_for_pid(&self, pid: u32) -> Result<OwnedFd>;

    /// Moves the calling thread into the namespace `ns` refers to.
    ///
    /// # Errors
    ///
    /// Returns an error if `setns(2)` fails.
    fn enter(&self, ns: BorrowedFd<'_>) -> Result<()>;
}

/// [`NetnsOps`] backed by `/proc` and `setns(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostNetns;

impl NetnsOps for HostNetns {
    fn open_current(&self) -> Result<OwnedFd> {
        open_ns(PathBuf::from("/proc/thread-self/ns/net"))
    }

    fn open_for_pid(&self, pid: u32) -> Result<OwnedFd> {
        open_ns(PathBuf::from(format!("/proc/{pid}/ns/net")))
    }

    fn enter(&self, ns: BorrowedFd<'_>) -> Result<()> {
        nix::sched::setns(ns, CloneFlags::CLONE_NEWNET).map_err(|e| HuskError::kernel("setns", e))
    }
}

fn open_ns(path: PathBuf) -> Result<OwnedFd> {
    File::open(&path)
        .map(OwnedFd::from)
        .map_err(|e| HuskError::Io { path, source: e })
}

/// Holds the calling thread inside another network namespace.
///
/// Dropping the guard, or calling [`NetnsGuard::restore`], returns the
/// thread to the namespace it was in when the guard was created.
pub struct NetnsGuard<'a> {
    ops: &'a dyn NetnsOps,
    original: Option<OwnedFd>,
    _not_send: PhantomData<*const ()>,
}

impl std::fmt::Debug for NetnsGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetnsGuard")
            .field("original", &self.original)
            .finish_non_exhaustive()
    }
}

impl<'a> NetnsGuard<'a> {
    /// Records the current namespace, then enters `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current namespace cannot be opened or the
    /// switch fails; the thread is unchanged in both cases.
    pub fn enter(ops: &'a dyn NetnsOps, target: BorrowedFd<'_>) -> Result<Self> {
        let original = ops.open_current()?;
        ops.enter(target)?;
        tracing::trace!("entered network namespace");
        Ok(Self {
            ops,
            original: Some(original),
            _not_send: PhantomData,
        })
    }

    /// Returns to the original namespace, reporting failure.
    ///
    /// # Errors
    ///
    /// Returns an error if switching back fails.
    pub fn restore(mut self) -> Result<()> {
        self.switch_back()
    }

    fn switch_back(&mut self) -> Result<()> {
        match self.original.take() {
            Some(original) => {
                self.ops.enter(original.as_fd())?;
                tracing::trace!("restored network namespace");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for NetnsGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.switch_back() {
            tracing::error!(error = %e, "failed to restore network namespace");
        }
    }
}

/// Runs `f` inside the network namespace of process `pid`.
///
/// The call happens on a dedicated thread that enters the namespace, runs
/// `f`, and switches back before exiting, whatever `f` returned.
///
/// # Errors
///
/// Returns the error of `f`, or an error if the namespace cannot be entered
/// or left. When both `f` and the switch back fail, the result is a
/// [`HuskError::Cleanup`].
pub fn run_in_netns<T, F>(ops: &dyn NetnsOps, pid: u32, f: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> Result<T> + Send,
{
    let target = ops.open_for_pid(pid)?;
    std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let guard = NetnsGuard::enter(ops, target.as_fd())?;
            match f() {
                Ok(value) => guard.restore().map(|()| value),
                Err(e) => Err(e.with_cleanup(guard.restore())),
            }
        });
        worker.join().unwrap_or_else(|_| {
            Err(HuskError::kernel(
                "network namespace worker",
                std::io::Error::other("worker thread panicked"),
            ))
        })
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::os::fd::AsRawFd;
    use std::os::fd::RawFd;
    use std::sync::Mutex;

    use super::*;

    /// Tracks which namespace "the thread" is in by labelling descriptors.
    struct FakeNetns {
        current: Mutex<String>,
        labels: Mutex<HashMap<RawFd, String>>,
        fail_enter: Option<&'static str>,
    }

    impl FakeNetns {
        fn new() -> Self {
            Self {
                current: Mutex::new("host".into()),
                labels: Mutex::new(HashMap::new()),
                fail_enter: None,
            }
        }

        fn current(&self) -> String {
            self.current.lock().unwrap().clone()
        }

        fn labelled(&self, label: String) -> OwnedFd {
            let fd = OwnedFd::from(File::open("/dev/null").unwrap());
            let _ = self.labels.lock().unwrap().insert(fd.as_raw_fd(), label);
            fd
        }
    }

    impl NetnsOps for FakeNetns {
        fn open_current(&self) -> Result<OwnedFd> {
            Ok(self.labelled(self.current()))
        }

        fn open_for_pid(&self, pid: u32) -> Result<OwnedFd> {
            Ok(self.labelled(format!("pid:{pid}")))
        }

        fn enter(&self, ns: BorrowedFd<'_>) -> Result<()> {
            let label = self.labels.lock().unwrap()[&ns.as_raw_fd()].clone();
            if self.fail_enter == Some(label.as_str()) {
                return Err(HuskError::kernel(
                    "setns",
                    std::io::Error::from_raw_os_error(libc::EPERM),
                ));
            }
            *self.current.lock().unwrap() = label;
            Ok(())
        }
    }

    #[test]
    fn closure_runs_inside_the_target_namespace() {
        let ops = FakeNetns::new();
        let seen = run_in_netns(&ops, 42, || Ok(ops.current())).unwrap();
        assert_eq!(seen, "pid:42");
        assert_eq!(ops.current(), "host");
    }

    #[test]
    fn namespace_is_restored_when_the_closure_fails() {
        let ops = FakeNetns::new();
        let err = run_in_netns::<(), _>(&ops, 42, || {
            Err(HuskError::Config {
                message: "route add failed".into(),
            })
        })
        .unwrap_err();
        assert!(matches!(err, HuskError::Config { .. }));
        assert_eq!(ops.current(), "host");
    }

    #[test]
    fn failed_restore_is_reported_with_the_original_error() {
        let ops = FakeNetns {
            fail_enter: Some("host"),
            ..FakeNetns::new()
        };
        let err = run_in_netns::<(), _>(&ops, 7, || {
            Err(HuskError::Config {
                message: "addr add failed".into(),
            })
        })
        .unwrap_err();
        assert!(matches!(err, HuskError::Cleanup { .. }));
    }

    #[test]
    fn failed_entry_leaves_the_thread_untouched() {
        let ops = FakeNetns {
            fail_enter: Some("pid:9"),
            ..FakeNetns::new()
        };
        let mut ran = false;
        let result = run_in_netns(&ops, 9, || {
            ran = true;
            Ok(())
        });
        assert!(result.is_err());
        assert!(!ran);
        assert_eq!(ops.current(), "host");
    }

    #[test]
    fn dropping_the_guard_switches_back() {
        let ops = FakeNetns::new();
        let target = ops.open_for_pid(3).unwrap();
        {
            let _guard = NetnsGuard::enter(&ops, target.as_fd()).unwrap();
            assert_eq!(ops.current(), "pid:3");
        }
        assert_eq!(ops.current(), "host");
    }
}
