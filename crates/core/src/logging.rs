use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{CoordinationError, CoordinationResult};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the provided level. Safe to call once per
/// process; a second call returns a configuration error instead of panicking.
pub fn init_logging(level: &str, json: bool) -> CoordinationResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    result.map_err(|e| CoordinationError::Configuration(format!("failed to init logging: {e}")))
}
