//! Formatted output helpers for CLI commands.

use std::fmt::Write as _;
use std::process::ExitCode;

use husk_common::types::ContainerInfo;

/// One-line summary of a container that keeps running in the background.
#[must_use]
pub fn started(info: &ContainerInfo) -> String {
    let mut line = format!("container {} started (id {}, pid {})", info.name, info.id, info.pid);
    if let (Some(network), Some(ip)) = (&info.network, info.ip_address) {
        let _ = write!(line, " on {network} at {ip}");
    }
    line
}

/// One-line summary of a stopped container.
#[must_use]
pub fn stopped(info: &ContainerInfo) -> String {
    format!("container {} stopped", info.name)
}

/// Maps a container exit code onto the process exit code.
///
/// Codes outside `0..=255`, or an unknown code, become a generic failure.
#[must_use]
pub fn exit_code(code: Option<i32>) -> ExitCode {
    match code.map(u8::try_from) {
        Some(Ok(code)) => ExitCode::from(code),
        _ => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use husk_common::types::ContainerId;

    use super::*;

    fn info() -> ContainerInfo {
        ContainerInfo::new(ContainerId::new("abc123"), "web", 4242, vec!["top".into()])
    }

    #[test]
    fn started_mentions_the_address_when_attached() {
        let mut info = info();
        assert_eq!(started(&info), "container web started (id abc123, pid 4242)");
        info.network = Some("br0".into());
        info.ip_address = Some("192.168.10.2".parse().unwrap());
        assert_eq!(
            started(&info),
            "container web started (id abc123, pid 4242) on br0 at 192.168.10.2"
        );
    }

    #[test]
    fn exit_codes_pass_through() {
        assert_eq!(exit_code(Some(0)), ExitCode::SUCCESS);
        assert_eq!(exit_code(Some(3)), ExitCode::from(3));
        assert_eq!(exit_code(Some(-1)), ExitCode::FAILURE);
        assert_eq!(exit_code(None), ExitCode::FAILURE);
    }
}
