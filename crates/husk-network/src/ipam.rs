//! IP address management.
//!
//! Each subnet is tracked as a string of `'0'`/`'1'` characters, one per
//! usable host address (network and broadcast addresses are never handed
//! out). The map of subnet to bitmap lives in a single JSON file. The first
//! allocation in a subnet is therefore `.1`, which networks use as gateway.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use husk_common::error::{HuskError, Result};
use ipnetwork::Ipv4Network;
use nix::fcntl::{Flock, FlockArg};

/// Smallest prefix whose bitmap we are willing to keep in memory.
const MIN_PREFIX: u8 = 16;
/// Largest prefix that still leaves a usable host address.
const MAX_PREFIX: u8 = 30;

const FREE: u8 = b'0';
const TAKEN: u8 = b'1';

type Pool = BTreeMap<String, String>;

/// File-backed address allocator.
#[derive(Debug)]
pub struct Ipam {
    file: PathBuf,
    lock: Mutex<()>,
}

impl Ipam {
    /// Creates an allocator persisting to `file`.
    #[must_use]
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Reserves the lowest free host address of `subnet`.
    ///
    /// The address part of `subnet` is ignored; only its prefix matters.
    ///
    /// # Errors
    ///
    /// Returns an error if the subnet is outside the supported prefix range,
    /// has no free address left, or the pool file cannot be read or written.
    pub fn allocate(&self, subnet: &Ipv4Network) -> Result<Ipv4Addr> {
        let subnet = normalize(subnet)?;
        self.with_pool(|pool| {
            let hosts = host_count(&subnet);
            let bitmap = pool
                .entry(subnet.to_string())
                .or_insert_with(|| "0".repeat(hosts));
            if bitmap.len() != hosts {
                return Err(HuskError::Config {
                    message: format!("corrupt allocation bitmap for {subnet}"),
                });
            }
            let Some(index) = bitmap.bytes().position(|b| b == FREE) else {
                return Err(HuskError::Config {
                    message: format!("no free address left in {subnet}"),
                });
            };
            bitmap.replace_range(index..=index, "1");
            let ip = host_at(&subnet, index);
            tracing::debug!(subnet = %subnet, ip = %ip, "address allocated");
            Ok(ip)
        })
    }

    /// Returns `ip` to the pool of `subnet`.
    ///
    /// # Errors
    ///
    /// Returns an error if `ip` is not a host address of `subnet`, the subnet
    /// has never been allocated from, the address is not currently allocated,
    /// or the pool file cannot be read or written.
    pub fn release(&self, subnet: &Ipv4Network, ip: Ipv4Addr) -> Result<()> {
        if self.release_if_allocated(subnet, ip)? {
            return Ok(());
        }
        Err(HuskError::Config {
            message: format!("{ip} is not allocated in {}", normalize(subnet)?),
        })
    }

    /// Returns `ip` to the pool of `subnet` if it is allocated.
    ///
    /// Returns `false` when there was nothing to release, including for a
    /// subnet that has never been allocated from.
    ///
    /// # Errors
    ///
    /// Returns an error if `ip` is not a host address of `subnet` or the pool
    /// file cannot be read or written.
    pub fn release_if_allocated(&self, subnet: &Ipv4Network, ip: Ipv4Addr) -> Result<bool> {
        let subnet = normalize(subnet)?;
        let index = index_of(&subnet, ip)?;
        self.with_pool(|pool| {
            let Some(bitmap) = pool.get_mut(&subnet.to_string()) else {
                return Ok(false);
            };
            if bitmap.as_bytes().get(index) != Some(&TAKEN) {
                return Ok(false);
            }
            bitmap.replace_range(index..=index, "0");
            tracing::debug!(subnet = %subnet, ip = %ip, "address released");
            Ok(true)
        })
    }

    /// Runs `f` on the pool with both the in-process and the file lock held,
    /// persisting the pool when `f` succeeds.
    fn with_pool<T>(&self, f: impl FnOnce(&mut Pool) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let io_err = |e| HuskError::Io {
            path: self.file.clone(),
            source: e,
        };

        if let Some(dir) = self.file.parent() {
            std::fs::create_dir_all(dir).map_err(|e| HuskError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        let file: File = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.file)
            .map_err(io_err)?;
        let mut file = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| HuskError::kernel(format!("flock {}", self.file.display()), errno))?;

        let mut content = String::new();
        let _ = file.read_to_string(&mut content).map_err(io_err)?;
        let mut pool: Pool = if content.trim().is_empty() {
            Pool::new()
        } else {
            serde_json::from_str(&content)?
        };

        let value = f(&mut pool)?;

        let encoded = serde_json::to_string(&pool)?;
        let _ = file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        file.set_len(0).map_err(io_err)?;
        file.write_all(encoded.as_bytes()).map_err(io_err)?;
        file.sync_data().map_err(io_err)?;
        Ok(value)
    }
}

fn normalize(subnet: &Ipv4Network) -> Result<Ipv4Network> {
    let prefix = subnet.prefix();
    if !(MIN_PREFIX..=MAX_PREFIX).contains(&prefix) {
        return Err(HuskError::Config {
            message: format!(
                "subnet prefix must be between /{MIN_PREFIX} and /{MAX_PREFIX}: {subnet}"
            ),
        });
    }
    Ipv4Network::new(subnet.network(), prefix).map_err(|e| HuskError::Config {
        message: format!("invalid subnet {subnet}: {e}"),
    })
}

fn host_count(subnet: &Ipv4Network) -> usize {
    (1_usize << (32 - u32::from(subnet.prefix()))) - 2
}

fn host_at(subnet: &Ipv4Network, index: usize) -> Ipv4Addr {
    // index < host_count <= 2^16, so the offset always fits.
    let offset = u32::try_from(index).unwrap_or(u32::MAX);
    Ipv4Addr::from(u32::from(subnet.network()) + offset + 1)
}

fn index_of(subnet: &Ipv4Network, ip: Ipv4Addr) -> Result<usize> {
    let base = u32::from(subnet.network());
    let raw = u32::from(ip);
    let hosts = host_count(subnet);
    let index = raw
        .checked_sub(base + 1)
        .and_then(|i| usize::try_from(i).ok())
        .filter(|i| *i < hosts);
    index.ok_or_else(|| HuskError::Config {
        message: format!("{ip} is not a host address of {subnet}"),
    })
}
