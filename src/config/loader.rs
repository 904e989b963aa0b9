//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_file() {
        let config = parse_config(
            r#"
            [listener]
            bind_address = "127.0.0.1:18081"

            [upstream]
            url = "http://127.0.0.1:9000/base"
            response_header_timeout_secs = 5

            [pool]
            buffer_max_idle = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:18081");
        assert_eq!(config.upstream.url, "http://127.0.0.1:9000/base");
        assert_eq!(config.upstream.response_header_timeout_secs, 5);
        assert_eq!(config.pool.buffer_max_idle, 8);
    }

    #[test]
    fn reports_validation_failures() {
        let err = parse_config("[rewrite]\nmax_body_bytes = 0\n").unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert_eq!(errors[0].field, "rewrite.max_body_bytes");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reports_syntax_errors() {
        assert!(matches!(
            parse_config("[listener\nbind_address = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
