//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and the upstream URL
//! - Validate value ranges (pool sizes, timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// Human readable reason.
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    match Url::parse(&config.upstream.url) {
        Ok(url) => {
            if !matches!(url.scheme(), "http" | "https") {
                errors.push(ValidationError::new(
                    "upstream.url",
                    format!("unsupported scheme '{}'", url.scheme()),
                ));
            }
            if url.host_str().is_none() {
                errors.push(ValidationError::new("upstream.url", "missing host"));
            }
        }
        Err(e) => errors.push(ValidationError::new("upstream.url", e.to_string())),
    }

    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.connect_timeout_secs", "must be > 0"));
    }
    if config.upstream.response_header_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "upstream.response_header_timeout_secs",
            "must be > 0",
        ));
    }

    if !config.rewrite.path_suffix.starts_with('/') {
        errors.push(ValidationError::new("rewrite.path_suffix", "must start with '/'"));
    }
    if config.rewrite.max_body_bytes == 0 {
        errors.push(ValidationError::new("rewrite.max_body_bytes", "must be > 0"));
    }

    let pool = &config.pool;
    for (field, value) in [
        ("pool.buffer_pre_grow", pool.buffer_pre_grow),
        ("pool.buffer_max_idle", pool.buffer_max_idle),
        ("pool.chunk_size", pool.chunk_size),
        ("pool.chunk_max_idle", pool.chunk_max_idle),
        ("pool.decoder_max_idle", pool.decoder_max_idle),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if pool.buffer_max_keep < pool.buffer_pre_grow {
        errors.push(ValidationError::new(
            "pool.buffer_max_keep",
            "must be at least pool.buffer_pre_grow",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
