//! Logging setup

use livecoach_core::LiveCoachError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `default_directives`. Calling this again
/// once a subscriber is installed does nothing.
pub fn init_logging(default_directives: &str) -> Result<(), LiveCoachError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives).map_err(|e| {
            LiveCoachError::InvalidConfiguration {
                field: "log_level".to_string(),
                reason: e.to_string(),
            }
        })?,
    };

    // Err only means a global subscriber already exists
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    Ok(())
}
