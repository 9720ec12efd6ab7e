//! Integration tests for container launch and teardown.
//!
//! These tests are implemented in:
//! `crates/husk-runtime/tests/launcher_test.rs`
//!
//! Covered scenarios:
//! - `foreground_run_hands_over_the_command_and_cleans_up`: command reaches init, everything is removed on exit
//! - `detached_run_limits_records_and_can_be_stopped`: cgroup limits, record, and `stop`
//! - `attached_container_gets_an_address_and_port_forward`: network attach and DNAT
//! - `failed_network_setup_removes_the_container`: rollback after a failed connect
//! - `unusable_requests_touch_nothing`: validation happens before any side effect
