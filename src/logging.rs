//! Log subscriber setup for hosts that do not install their own.
//!
//! The cache itself only emits `tracing` events. Embedding services that
//! already configure a subscriber should not call [`init`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::BgCacheError;

/// Install a global subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Supports two formats:
/// - "json": structured output for production
/// - "pretty": human-readable output for development
pub fn init(settings: &LoggingSettings) -> Result<(), BgCacheError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    match settings.format.as_str() {
        "json" => {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init()
                .map_err(|err| BgCacheError::Config(err.to_string()))
        }
        "pretty" => {
            let pretty_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(pretty_layer)
                .try_init()
                .map_err(|err| BgCacheError::Config(err.to_string()))
        }
        other => Err(BgCacheError::Config(format!(
            "unsupported log format: {other}. Use 'json' or 'pretty'"
        ))),
    }
}
