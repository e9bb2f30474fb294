//! Logging bootstrap.
//!
//! The crate emits diagnostics through the `log` facade; embedding
//! applications bring their own subscriber. These helpers wire up
//! `env_logger` for binaries and tests that have nothing else configured.

use env_logger::Env;

/// Initializes `env_logger` at `info` unless `RUST_LOG` overrides it.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let _ = try_init();
}

/// Fallible variant of [`init`] for callers that care whether another
/// logger already claimed the facade.
pub fn try_init() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init()
}
