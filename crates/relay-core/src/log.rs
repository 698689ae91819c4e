pub use tracing::{debug, error, info, trace, warn};

use crate::errors::LogError;

/// Installs the [`color_eyre`] error reporter and the [`tracing-subscriber`]
/// logging system.
///
/// Sets `RUST_LIB_BACKTRACE=1` and `RUST_LOG=info` when unset.
pub fn setup() -> Result<(), LogError> {
    use tracing_subscriber::EnvFilter;

    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        unsafe { std::env::set_var("RUST_LIB_BACKTRACE", "1") }
    }

    color_eyre::install().map_err(LogError::ColorEyre)?;

    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info,relay_hub=debug") }
    }

    tracing_subscriber::fmt::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .map_err(LogError::TracingSubscriber)?;

    Ok(())
}
