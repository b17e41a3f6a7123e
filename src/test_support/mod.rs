//! Helpers shared by unit tests.

#[path = "../../tests/support/socket_guard.rs"]
pub mod socket_guard;
