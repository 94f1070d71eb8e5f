//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    LogOutput, LoggingConfig, PollingConfig, RetryConfig, SessionConfig, TgflowConfig,
};
use std::collections::HashSet;

/// Validates the entire configuration.
pub fn validate_config(config: &TgflowConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_sessions_config(&config.sessions)?;
    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

/// Validates retry configuration.
fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}

/// Validates long-poll settings.
fn validate_polling_config(polling: &PollingConfig) -> ConfigResult<()> {
    if let Some(limit) = polling.limit
        && !(1..=100).contains(&limit)
    {
        return Err(ConfigError::validation(format!(
            "Polling limit must be between 1 and 100, got {limit}"
        )));
    }
    Ok(())
}

/// Validates all session configurations.
fn validate_sessions_config(sessions: &[SessionConfig]) -> ConfigResult<()> {
    let mut seen_ids = HashSet::new();

    for session in sessions {
        if !seen_ids.insert(&session.id) {
            return Err(ConfigError::DuplicateSessionId(session.id.clone()));
        }

        validate_session_config(session)?;
    }

    Ok(())
}

/// Validates a single session configuration.
fn validate_session_config(session: &SessionConfig) -> ConfigResult<()> {
    if session.id.is_empty() {
        return Err(ConfigError::missing_field("session.id"));
    }

    if session.id.contains(' ') {
        return Err(ConfigError::validation("Session ID cannot contain spaces"));
    }

    if session.token.is_empty() {
        return Err(ConfigError::missing_field(format!(
            "sessions[{}].token",
            session.id
        )));
    }

    if session.request_timeout_secs == 0 {
        return Err(ConfigError::validation(
            "Request timeout must be greater than 0",
        ));
    }

    validate_url(&session.server)?;
    validate_retry_config(&session.retry)?;

    if let Some(ref polling) = session.polling {
        validate_polling_config(polling)?;
    }

    if session.dispatch.queue_capacity == 0 {
        return Err(ConfigError::validation(
            "Dispatch queue capacity must be greater than 0",
        ));
    }

    if session.dispatch.drain_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Dispatch drain timeout must be greater than 0",
        ));
    }

    Ok(())
}

/// Validates a server URL.
fn validate_url(url: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("server"));
    }

    let valid_schemes = ["http://", "https://"];
    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {:?}", valid_schemes),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(session: SessionConfig) -> TgflowConfig {
        TgflowConfig {
            logging: Default::default(),
            sessions: vec![session],
        }
    }

    #[test]
    fn test_validate_empty_config() {
        let config = TgflowConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_default_session() {
        let config = config_with(SessionConfig::new("main", "123:abc"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_duplicate_session_id() {
        let session = SessionConfig::new("main", "123:abc");
        let config = TgflowConfig {
            logging: Default::default(),
            sessions: vec![session.clone(), session],
        };

        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::DuplicateSessionId(_))));
    }

    #[test]
    fn test_validate_missing_token() {
        let config = config_with(SessionConfig::new("main", ""));
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_server_scheme() {
        let mut session = SessionConfig::new("main", "123:abc");
        session.server = "ftp://example.org".into();
        assert!(matches!(
            validate_config(&config_with(session)),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_validate_limit_range() {
        let mut session = SessionConfig::new("main", "123:abc");
        if let Some(polling) = session.polling.as_mut() {
            polling.limit = Some(101);
        }
        assert!(validate_config(&config_with(session.clone())).is_err());

        if let Some(polling) = session.polling.as_mut() {
            polling.limit = Some(100);
        }
        assert!(validate_config(&config_with(session)).is_ok());
    }

    #[test]
    fn test_validate_retry_bounds() {
        let mut session = SessionConfig::new("main", "123:abc");
        session.retry.max_delay_ms = 10;
        assert!(validate_config(&config_with(session.clone())).is_err());

        session.retry = RetryConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(validate_config(&config_with(session)).is_err());
    }

    #[test]
    fn test_validate_drain_timeout() {
        let mut session = SessionConfig::new("main", "123:abc");
        session.dispatch.drain_timeout_ms = 0;
        assert!(validate_config(&config_with(session)).is_err());
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = TgflowConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());
    }
}
