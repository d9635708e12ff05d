//! Logging utilities

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
///
/// Honours `RUST_LOG`; defaults to `info` when it is unset.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Initialize logging for tests, ignoring repeated calls
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}
