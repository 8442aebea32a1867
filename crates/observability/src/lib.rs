//! Process-wide logging setup shared by the splitledger binaries.

/// Initialize tracing/logging from the environment.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    if !tracing::init(tracing::LogConfig::from_env()) {
        ::tracing::debug!("logging already initialized");
    }
}

/// Subscriber configuration and installation.
pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat};
