//! Integration tests for bridge networks.
//!
//! These tests are implemented in:
//! `crates/husk-network/tests/network_test.rs`
//!
//! Covered scenarios:
//! - `created_network_is_listed_with_its_gateway`: list shows the gateway-bearing range
//! - `recreating_after_delete_reuses_the_gateway`: the gateway is released on delete
//! - `connecting_a_container_forwards_its_port`: `br0` over `192.168.10.0/24`, `8080:80` to `.2:80`
//! - `container_side_is_configured_inside_its_namespace`: peer setup runs in the container netns
//! - `failed_configuration_rolls_back_the_connection`: veth and address are undone
//! - `records_are_reloaded_by_a_new_context`: network records survive a restart
