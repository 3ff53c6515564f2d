// Library exports for integration tests and reusable components

pub mod batching;
pub mod cache;
pub mod config;
pub mod db;
pub mod import;
pub mod library;
pub mod lock;
pub mod mpc;
pub mod ports;
pub mod scryfall;

// Test support (unit tests, or integration tests with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
