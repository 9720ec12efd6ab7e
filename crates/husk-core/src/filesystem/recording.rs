//! Recording [`MountSyscalls`] double for unit tests.

use std::cell::RefCell;
use std::convert::Infallible;
use std::path::{Path, PathBuf};

use husk_common::error::{HuskError, Result};
use nix::mount::MsFlags;

use super::MountSyscalls;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Mount {
        source: Option<String>,
        target: PathBuf,
        fstype: Option<String>,
        flags: MsFlags,
        data: Option<String>,
    },
    UmountDetach(PathBuf),
    PivotRoot(PathBuf, PathBuf),
    Chdir(PathBuf),
    CreateDir(PathBuf),
    RemoveDir(PathBuf),
    Exec(PathBuf, Vec<String>),
}

impl Call {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Mount { .. } => "mount",
            Self::UmountDetach(_) => "umount",
            Self::PivotRoot(..) => "pivot_root",
            Self::Chdir(_) => "chdir",
            Self::CreateDir(_) => "create_dir",
            Self::RemoveDir(_) => "remove_dir",
            Self::Exec(..) => "exec",
        }
    }
}

#[derive(Debug)]
pub struct Recording {
    cwd: PathBuf,
    fail_on: Option<&'static str>,
    calls: RefCell<Vec<Call>>,
}

impl Recording {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            fail_on: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Makes every call of `kind` fail after being recorded.
    pub fn failing_on(mut self, kind: &'static str) -> Self {
        self.fail_on = Some(kind);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn mount_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Mount { .. } | Call::UmountDetach(_) | Call::PivotRoot(..)))
            .count()
    }

    fn record(&self, call: Call) -> Result<()> {
        let kind = call.kind();
        self.calls.borrow_mut().push(call);
        if self.fail_on == Some(kind) {
            return Err(HuskError::kernel(
                kind,
                std::io::Error::from_raw_os_error(libc::EPERM),
            ));
        }
        Ok(())
    }
}

impl MountSyscalls for Recording {
    fn mount(
        &self,
        source: Option<&str>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        self.record(Call::Mount {
            source: source.map(str::to_string),
            target: target.to_path_buf(),
            fstype: fstype.map(str::to_string),
            flags,
            data: data.map(str::to_string),
        })
    }

    fn umount_detach(&self, target: &Path) -> Result<()> {
        self.record(Call::UmountDetach(target.to_path_buf()))
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()> {
        self.record(Call::PivotRoot(new_root.to_path_buf(), put_old.to_path_buf()))
    }

    fn chdir(&self, dir: &Path) -> Result<()> {
        self.record(Call::Chdir(dir.to_path_buf()))
    }

    fn create_dir(&self, dir: &Path) -> Result<()> {
        self.record(Call::CreateDir(dir.to_path_buf()))
    }

    fn remove_dir(&self, dir: &Path) -> Result<()> {
        self.record(Call::RemoveDir(dir.to_path_buf()))
    }

    fn current_dir(&self) -> Result<PathBuf> {
        Ok(self.cwd.clone())
    }

    fn exec(&self, program: &Path, args: &[String]) -> Result<Infallible> {
        self.record(Call::Exec(program.to_path_buf(), args.to_vec()))?;
        Err(HuskError::kernel(
            "execv",
            std::io::Error::from_raw_os_error(libc::ENOEXEC),
        ))
    }
}
