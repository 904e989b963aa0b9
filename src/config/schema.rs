//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream service and client connection settings.
    pub upstream: UpstreamConfig,

    /// Request body rewrite settings.
    pub rewrite: RewriteConfig,

    /// Buffer, chunk and decoder pool ceilings.
    pub pool: PoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:18080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:18080".to_string(),
        }
    }
}

/// Upstream service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL every request is forwarded to.
    pub url: String,

    /// Maximum idle keep-alive connections kept per upstream host.
    pub pool_max_idle_per_host: usize,

    /// Idle keep-alive connections are closed after this many seconds.
    pub pool_idle_timeout_secs: u64,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Maximum time to wait for upstream response headers, in seconds.
    pub response_header_timeout_secs: u64,

    /// Offer HTTP/2 during the TLS handshake.
    pub http2: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "https://right.codes".to_string(),
            pool_max_idle_per_host: 4096,
            pool_idle_timeout_secs: 90,
            connect_timeout_secs: 10,
            response_header_timeout_secs: 60,
            http2: true,
        }
    }
}

/// Request body rewrite configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Disable to forward every request untouched.
    pub enabled: bool,

    /// POST requests whose path ends with this suffix are rewritten.
    pub path_suffix: String,

    /// Largest request body (after decompression) that is buffered.
    pub max_body_bytes: usize,

    /// Log `model` and `reasoning.effort` of every matched request.
    pub log_request_summary: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path_suffix: "/v1/responses".to_string(),
            max_body_bytes: 64 * 1024 * 1024,
            log_request_summary: true,
        }
    }
}

/// Resource pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity reserved for freshly created body buffers.
    pub buffer_pre_grow: usize,

    /// Buffers that grew past this capacity are dropped instead of pooled.
    pub buffer_max_keep: usize,

    /// Maximum idle body buffers kept.
    pub buffer_max_idle: usize,

    /// Size of the fixed copy chunks.
    pub chunk_size: usize,

    /// Maximum idle copy chunks kept.
    pub chunk_max_idle: usize,

    /// Maximum idle gzip decoders kept.
    pub decoder_max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_pre_grow: 32 * 1024,
            buffer_max_keep: 1024 * 1024,
            buffer_max_idle: 1024,
            chunk_size: 32 * 1024,
            chunk_max_idle: 256,
            decoder_max_idle: 64,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub log_filter: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "responses_proxy=info,tower_http=info".to_string(),
            log_format: LogFormat::Text,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
