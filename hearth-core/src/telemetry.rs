//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over `general.log_level`. With
//! `general.json_logs` set, events are emitted as one JSON object per line.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::GeneralConfig;
use crate::error::{HearthError, Result};

/// Build the level filter for `config`, letting `RUST_LOG` override it.
///
/// # Errors
/// Returns `HearthError::Config` if `log_level` is not a valid directive.
pub fn env_filter(config: &GeneralConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| HearthError::Config(format!("general.log_level '{}': {e}", config.log_level))),
    }
}

/// Install the global subscriber.
///
/// # Errors
/// Returns `HearthError::Config` for a bad log level, or if a global
/// subscriber is already installed.
pub fn init(config: &GeneralConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json_logs {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    installed.map_err(|e| HearthError::Config(format!("tracing already initialised: {e}")))?;

    tracing::info!(
        level = %config.log_level,
        json = config.json_logs,
        "hearth tracing initialised"
    );
    Ok(())
}
