//! Process-wide tracing setup.
//!
//! Every crate in the workspace logs through `tracing`; binaries and test
//! harnesses call [`init`] (or [`init_with`]) once to install a subscriber.

pub mod tracing;

pub use tracing::{LogFormat, LoggingConfig, ParseLogFormatError};

/// Install the default subscriber (JSON, `RUST_LOG` or `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(&LoggingConfig::default());
}

/// Install a subscriber built from `config`.
pub fn init_with(config: &LoggingConfig) {
    tracing::init(config);
}
