//! Reverse proxy that normalizes `POST …/v1/responses` request bodies.
//!
//! Every request is forwarded to a single upstream. Matching requests have
//! their JSON body buffered, optionally gunzipped, and rewritten: a string
//! `instructions` field moves into `input` as a developer message, and a
//! `prompt_cache_key` derived from the caller's identity is added when absent.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod rewrite;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
