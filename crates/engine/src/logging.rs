//! Log output
//!
//! xwrap logs through `tracing` under the targets `xwrap::request`,
//! `xwrap::txn` and `xwrap::adapter`. Nothing is printed until a subscriber
//! is installed, either by the application or with one of these helpers.

use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use xwrap_core::{Error, Result};

/// Install a console subscriber for xwrap's targets at `level`
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_console(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("xwrap={}", level))
            .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", level, e)))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))
}

/// Install `subscriber` as the global logger
pub fn use_logger<S>(subscriber: S) -> Result<()>
where
    S: Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))
}
