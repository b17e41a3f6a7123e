//! Shared helpers for integration tests.

pub mod socket_guard;

/// Starts a wiremock server, or returns early from the test when localhost
/// sockets cannot be bound.
#[allow(unused_macros)]
macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = support::socket_guard::mock_server().await else {
            return;
        };
        mock_server
    }};
}
