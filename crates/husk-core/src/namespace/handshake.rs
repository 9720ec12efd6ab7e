//! Host-to-init command handshake.
//!
//! The host writes the user command, joined by single spaces, into an
//! anonymous pipe and closes it; the init process reads the pipe to EOF on
//! [`HANDSHAKE_FD`]. Arguments that contain whitespace cannot be carried.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::PathBuf;

use husk_common::constants::HANDSHAKE_FD;
use husk_common::error::{HuskError, Result};

/// Serializes `command` into the handshake payload.
///
/// # Errors
///
/// Returns [`HuskError::Config`] if `command` is empty or an argument is
/// empty or contains whitespace.
pub fn encode(command: &[String]) -> Result<String> {
    if command.is_empty() {
        return Err(HuskError::Config {
            message: "container command is empty".into(),
        });
    }
    if let Some(bad) = command
        .iter()
        .find(|a| a.is_empty() || a.chars().any(char::is_whitespace))
    {
        return Err(HuskError::Config {
            message: format!("argument cannot be passed to the container: {bad:?}"),
        });
    }
    Ok(command.join(" "))
}

/// Splits a handshake payload back into arguments, dropping empty pieces.
#[must_use]
pub fn decode(payload: &str) -> Vec<String> {
    payload
        .split(' ')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Writes `command` into the pipe and closes it.
///
/// # Errors
///
/// Returns an error if the command cannot be encoded or the write fails.
pub fn send(writer: OwnedFd, command: &[String]) -> Result<()> {
    let payload = encode(command)?;
    let mut pipe = File::from(writer);
    pipe.write_all(payload.as_bytes()).map_err(|e| HuskError::Io {
        path: PathBuf::from("handshake pipe"),
        source: e,
    })?;
    tracing::debug!(command = %payload, "command sent to init");
    Ok(())
}

/// Reads a command from `reader` until EOF.
///
/// # Errors
///
/// Returns an error if the read fails.
pub fn read_command(mut reader: impl Read) -> Result<Vec<String>> {
    let mut payload = String::new();
    reader
        .read_to_string(&mut payload)
        .map_err(|e| HuskError::Io {
            path: PathBuf::from("handshake pipe"),
            source: e,
        })?;
    Ok(decode(&payload))
}

/// Reads the command from the inherited handshake descriptor.
///
/// Must be called at most once per process: the descriptor is taken over
/// and closed.
///
/// # Errors
///
/// Returns an error if the read fails.
pub fn read_inherited() -> Result<Vec<String>> {
    // SAFETY: the parent installs the pipe's read end on HANDSHAKE_FD before
    // exec, and nothing else in the init process owns that descriptor.
    let fd = unsafe { OwnedFd::from_raw_fd(HANDSHAKE_FD) };
    read_command(File::from(fd))
}
