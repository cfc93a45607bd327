//! Logging initialization.
//!
//! JSON output for production, pretty output for development, level and
//! per-module filtering via `RUST_LOG` with a configured fallback.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::error::{ErrorContext, Result};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level so operators can
/// raise verbosity without a config change. Calling this twice returns an
/// error from the underlying registry.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .context("Failed to initialize JSON logging")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init()
            .context("Failed to initialize logging")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_not_reentrant() {
        let config = ObservabilityConfig::default();
        let first = init_logging(&config);
        let second = init_logging(&config);
        // Exactly one of the two calls may own the global subscriber; the
        // other must fail cleanly rather than panic. Other tests in the
        // process may have installed one already, so `first` can go either way.
        if first.is_ok() {
            assert!(second.is_err());
        }
    }
}
