//! Logging setup for provider processes
//!
//! A provider plugin's stdout belongs to the engine, so log output goes to
//! stderr. Verbosity is controlled by `STRATUS_LOG` using `EnvFilter` syntax
//! (e.g. `STRATUS_LOG=stratus_provider_huaweicloud=debug`).

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "STRATUS_LOG";

const DEFAULT_FILTER: &str = "info";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber, returning an error if one is already set
pub fn try_init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    try_init_logging_with_default(DEFAULT_FILTER)
}

/// Like [`try_init_logging`] with a custom fallback filter
pub fn try_init_logging_with_default(
    default: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
}

/// Install the global subscriber, ignoring a subscriber that is already set
pub fn init_logging() {
    let _ = try_init_logging();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected() {
        init_logging();
        assert!(try_init_logging().is_err());
    }
}
