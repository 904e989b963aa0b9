//! Upstream target and outbound request preparation.
//!
//! # Responsibilities
//! - Build the pooled HTTPS/HTTP client
//! - Point each request at the upstream (scheme, authority, joined path)
//! - Strip hop-by-hop headers in both directions
//! - Append the client address to `X-Forwarded-For`

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{HeaderName, CONNECTION, HOST};
use axum::http::request::Parts;
use axum::http::uri::{Authority, InvalidUri, Scheme};
use axum::http::{HeaderMap, HeaderValue, Uri, Version};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use thiserror::Error;
use url::Url;

use crate::config::UpstreamConfig;

/// Client used for every upstream request.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),

    #[error("upstream url has no host")]
    MissingHost,

    #[error("invalid upstream authority: {0}")]
    Authority(#[from] InvalidUri),

    #[error("failed to install rustls crypto provider")]
    CryptoProvider,

    #[error("failed to build upstream uri: {0}")]
    Uri(#[from] axum::http::Error),
}

/// Where requests are forwarded.
#[derive(Debug, Clone)]
pub struct Upstream {
    scheme: Scheme,
    authority: Authority,
    host: HeaderValue,
    base_path: String,
    base_query: Option<String>,
}

impl Upstream {
    pub fn from_url(raw: &str) -> Result<Self, UpstreamError> {
        let url = Url::parse(raw)?;
        let host = url.host_str().ok_or(UpstreamError::MissingHost)?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        let authority: Authority = authority.parse()?;
        let scheme = if url.scheme() == "https" {
            Scheme::HTTPS
        } else {
            Scheme::HTTP
        };
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|_| UpstreamError::MissingHost)?;

        Ok(Self {
            scheme,
            authority,
            host,
            base_path: url.path().to_owned(),
            base_query: url.query().map(str::to_owned),
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Map an inbound request URI onto the upstream.
    pub fn uri_for(&self, uri: &Uri) -> Result<Uri, UpstreamError> {
        let mut path_and_query = join_path(&self.base_path, uri.path());
        match (self.base_query.as_deref(), uri.query()) {
            (Some(base), Some(query)) => {
                path_and_query.push('?');
                path_and_query.push_str(base);
                path_and_query.push('&');
                path_and_query.push_str(query);
            }
            (Some(query), None) | (None, Some(query)) => {
                path_and_query.push('?');
                path_and_query.push_str(query);
            }
            (None, None) => {}
        }

        Ok(Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()?)
    }

    /// Rewrite request head in place for forwarding.
    pub fn prepare(&self, parts: &mut Parts, peer: Option<SocketAddr>) -> Result<(), UpstreamError> {
        parts.uri = self.uri_for(&parts.uri)?;
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);
        parts.headers.insert(HOST, self.host.clone());
        if let Some(peer) = peer {
            append_forwarded_for(&mut parts.headers, peer);
        }
        Ok(())
    }
}

/// Join the upstream base path and request path with exactly one slash.
fn join_path(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {ip}"),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

fn install_crypto_provider() -> Result<(), UpstreamError> {
    static INSTALLED: OnceLock<bool> = OnceLock::new();
    let ok = *INSTALLED.get_or_init(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .is_ok()
            || rustls::crypto::CryptoProvider::get_default().is_some()
    });
    if ok {
        Ok(())
    } else {
        Err(UpstreamError::CryptoProvider)
    }
}

/// Build the keep-alive client from upstream settings.
pub fn build_client(config: &UpstreamConfig) -> Result<UpstreamClient, UpstreamError> {
    install_crypto_provider()?;

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);
    http.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));

    let roots = match HttpsConnectorBuilder::new().with_native_roots() {
        Ok(builder) => builder,
        Err(error) => {
            tracing::warn!(error = %error, "No native TLS roots loaded, HTTPS upstreams will fail verification");
            HttpsConnectorBuilder::new().with_tls_config(
                rustls::ClientConfig::builder()
                    .with_root_certificates(rustls::RootCertStore::empty())
                    .with_no_client_auth(),
            )
        }
    };
    let builder = roots.https_or_http().enable_http1();
    let https = if config.http2 {
        builder.enable_http2().wrap_connector(http)
    } else {
        builder.wrap_connector(http)
    };

    Ok(Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
        .build(https))
}
