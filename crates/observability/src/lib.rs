//! Tracing/logging setup shared by every binary and test suite.

mod subscriber;

pub use subscriber::{DEFAULT_FILTER, init, init_for_tests};
