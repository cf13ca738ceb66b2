use tracing_subscriber::EnvFilter;

use crate::{error::LoggingError, logging::config::LoggingConfig};

/// `RUST_LOG`, если он задан и корректен, иначе директива из конфигурации.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = config.filter_directive();
    EnvFilter::try_new(&directive).map_err(|err| LoggingError::InvalidFilter {
        directive,
        reason: err.to_string(),
    })
}
