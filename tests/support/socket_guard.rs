//! Loopback probe for wiremock-backed tests.
//!
//! Sandboxes without loopback networking skip these tests instead of failing,
//! unless `FETCHCACHE_REQUIRE_SOCKET_TESTS` is set.

use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

const REQUIRE_SOCKET_TESTS_ENV: &str = "FETCHCACHE_REQUIRE_SOCKET_TESTS";

fn socket_tests_required() -> bool {
    std::env::var(REQUIRE_SOCKET_TESTS_ENV)
        .is_ok_and(|value| matches!(value.trim(), "1" | "true" | "yes"))
}

/// Returns whether a localhost listener can be bound.
///
/// # Panics
///
/// Panics instead of returning false when socket tests are required.
#[track_caller]
#[must_use]
pub fn loopback_available() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return true;
    }
    let caller = Location::caller();
    assert!(
        !socket_tests_required(),
        "no localhost sockets for {caller} while {REQUIRE_SOCKET_TESTS_ENV} is set"
    );
    eprintln!("skipping {caller}: localhost sockets unavailable");
    false
}

/// Starts a mock server, or `None` when localhost sockets are unavailable.
#[allow(dead_code)]
pub async fn mock_server() -> Option<MockServer> {
    if loopback_available() {
        Some(MockServer::start().await)
    } else {
        None
    }
}
