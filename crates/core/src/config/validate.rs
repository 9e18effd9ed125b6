use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - YouTube API key is present and page size is within API limits
/// - Rate limit window and size are non-zero
/// - Cache TTL and sweep interval are non-zero
/// - At least one fetch attempt is allowed
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.youtube.api_key.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "youtube.api_key cannot be empty".to_string(),
        ));
    }

    if config.youtube.page_size == 0 || config.youtube.page_size > 50 {
        return Err(ConfigError::ValidationError(
            "youtube.page_size must be between 1 and 50".to_string(),
        ));
    }

    if config.rate_limit.max_requests == 0 {
        return Err(ConfigError::ValidationError(
            "rate_limit.max_requests cannot be 0".to_string(),
        ));
    }

    if config.rate_limit.window_secs == 0 {
        return Err(ConfigError::ValidationError(
            "rate_limit.window_secs cannot be 0".to_string(),
        ));
    }

    if config.cache.ttl_secs == 0 {
        return Err(ConfigError::ValidationError(
            "cache.ttl_secs cannot be 0".to_string(),
        ));
    }

    if config.cache.sweep_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "cache.sweep_interval_secs cannot be 0".to_string(),
        ));
    }

    if config.fetch.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "fetch.retry.max_attempts cannot be 0".to_string(),
        ));
    }

    Ok(())
}
