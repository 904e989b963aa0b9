//! Per-request rewrite orchestration.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::body::Body;
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use http_body_util::BodyExt;
use serde::Deserialize;
use tracing::Level;

use super::cache_key::CacheIdentity;
use super::decision::{Action, FieldScanner};
use super::decompress::{gunzip, is_gzip_encoded};
use super::document::rewrite_document;
use super::splice::prepend_string_field;
use super::PROMPT_CACHE_KEY;
use crate::config::RewriteConfig;
use crate::error::RewriteError;
use crate::http::body;
use crate::observability::metrics;
use crate::pool::{PooledBuf, Pools};

/// How a body left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passthrough,
    AlreadyKeyed,
    Spliced,
    Restructured,
    Unchanged,
    ParseFallback,
    SerializeFallback,
    DecodeFallback,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passthrough => "passthrough",
            Outcome::AlreadyKeyed => "already_keyed",
            Outcome::Spliced => "spliced",
            Outcome::Restructured => "restructured",
            Outcome::Unchanged => "unchanged",
            Outcome::ParseFallback => "parse_fallback",
            Outcome::SerializeFallback => "serialize_fallback",
            Outcome::DecodeFallback => "decode_fallback",
        }
    }
}

/// Rewrites matching request bodies using shared pools.
#[derive(Debug, Clone)]
pub struct Rewriter {
    pools: Pools,
    scanner: FieldScanner,
    config: RewriteConfig,
}

impl Rewriter {
    pub fn new(pools: Pools, config: RewriteConfig) -> Self {
        Self {
            pools,
            scanner: FieldScanner::new(),
            config,
        }
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    /// Whether a request goes through the rewrite at all.
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.config.enabled && method == Method::POST && path.ends_with(&self.config.path_suffix)
    }

    /// Buffer, rewrite and reinstall the body of a matching request.
    ///
    /// Only read and size errors surface; every other failure forwards the
    /// bytes already buffered.
    pub async fn rewrite_request(
        &self,
        parts: &mut Parts,
        body: Body,
        peer: Option<SocketAddr>,
    ) -> Result<Body, RewriteError> {
        let raw = self.read_body(&parts.headers, body).await?;
        metrics::record_body_bytes("in", raw.len());

        let input = if is_gzip_encoded(&parts.headers) {
            match gunzip(&self.pools, &raw, self.config.max_body_bytes) {
                Ok(decoded) => {
                    parts.headers.remove(CONTENT_ENCODING);
                    decoded
                }
                Err(error) => {
                    tracing::warn!(error = %error, "gzip decode failed, forwarding compressed body");
                    metrics::record_rewrite(Outcome::DecodeFallback.as_str());
                    metrics::record_body_bytes("out", raw.len());
                    return Ok(body::install(parts, raw));
                }
            }
        } else {
            raw
        };

        if self.config.log_request_summary && tracing::enabled!(Level::INFO) {
            log_summary(&input);
        }

        let identity = CacheIdentity::from_request(&parts.headers, peer);
        let (output, outcome) = self.transform(input, &identity);
        tracing::debug!(outcome = outcome.as_str(), bytes = output.len(), "request body processed");
        metrics::record_rewrite(outcome.as_str());
        metrics::record_body_bytes("out", output.len());

        Ok(body::install(parts, output))
    }

    /// Read the whole body into a pooled buffer, enforcing the size limit.
    async fn read_body(&self, headers: &HeaderMap, mut body: Body) -> Result<PooledBuf, RewriteError> {
        let limit = self.config.max_body_bytes;
        let mut buf = self.pools.buffers.acquire();

        if let Some(len) = declared_length(headers) {
            if len > limit {
                return Err(RewriteError::BodyTooLarge { limit });
            }
            if len <= self.pools.buffers.max_keep() {
                buf.reserve(len);
            }
        }

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(RewriteError::BodyRead)?;
            if let Ok(data) = frame.into_data() {
                if buf.len() + data.len() > limit {
                    return Err(RewriteError::BodyTooLarge { limit });
                }
                buf.extend_from_slice(&data);
            }
        }
        Ok(buf)
    }

    /// Run the decision engine over a plaintext body.
    ///
    /// Whichever buffer is not returned goes back to the pool before this
    /// returns.
    pub fn transform(&self, input: PooledBuf, identity: &CacheIdentity<'_>) -> (PooledBuf, Outcome) {
        match Action::decide(self.scanner.scan(&input)) {
            Action::Passthrough => (input, Outcome::Passthrough),
            Action::AlreadyKeyed => (input, Outcome::AlreadyKeyed),
            Action::InjectCacheKey => {
                let mut out = self.pools.buffers.acquire();
                match prepend_string_field(&input, PROMPT_CACHE_KEY, &identity.derive(), &mut out) {
                    Ok(()) => (out, Outcome::Spliced),
                    Err(_) => {
                        drop(out);
                        self.rebuild(input, false, identity)
                    }
                }
            }
            Action::Restructure => self.rebuild(input, true, identity),
        }
    }

    fn rebuild(
        &self,
        input: PooledBuf,
        rewrite_instructions: bool,
        identity: &CacheIdentity<'_>,
    ) -> (PooledBuf, Outcome) {
        let mut out = self.pools.buffers.acquire();
        match rewrite_document(&input, rewrite_instructions, identity, &mut out) {
            Ok(true) => (out, Outcome::Restructured),
            Ok(false) => (input, Outcome::Unchanged),
            Err(error @ RewriteError::Serialize(_)) => {
                tracing::warn!(error = %error, "forwarding original body");
                (input, Outcome::SerializeFallback)
            }
            Err(error) => {
                tracing::debug!(error = %error, "forwarding original body");
                (input, Outcome::ParseFallback)
            }
        }
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[derive(Deserialize)]
struct Summary<'a> {
    #[serde(borrow, default)]
    model: Option<Cow<'a, str>>,
    #[serde(borrow, default)]
    reasoning: Option<Reasoning<'a>>,
}

#[derive(Deserialize)]
struct Reasoning<'a> {
    #[serde(borrow, default)]
    effort: Option<Cow<'a, str>>,
}

fn log_summary(body: &[u8]) {
    let Ok(summary) = serde_json::from_slice::<Summary<'_>>(body) else {
        return;
    };
    let effort = summary.reasoning.and_then(|r| r.effort);
    tracing::info!(
        model = summary.model.as_deref().unwrap_or("-"),
        reasoning_effort = effort.as_deref().unwrap_or("-"),
        "request"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use axum::http::header::TRANSFER_ENCODING;
    use axum::http::Request;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::{json, Value};
    use std::io::Write;

    fn rewriter() -> Rewriter {
        Rewriter::new(Pools::new(&PoolConfig::default()), RewriteConfig::default())
    }

    fn request(body: impl Into<Body>, headers: &[(&'static str, &'static str)]) -> (Parts, Body) {
        let mut builder = Request::builder().method(Method::POST).uri("/v1/responses");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(body.into()).unwrap().into_parts()
    }

    async fn run(
        rewriter: &Rewriter,
        body: impl Into<Body>,
        headers: &[(&'static str, &'static str)],
    ) -> (Parts, Vec<u8>) {
        let (mut parts, body) = request(body, headers);
        let body = rewriter.rewrite_request(&mut parts, body, None).await.unwrap();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        (parts, bytes.to_vec())
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn auth_key() -> String {
        CacheIdentity::Credential(b"Bearer sk-test").derive()
    }

    #[test]
    fn matches_post_with_suffix_only() {
        let r = rewriter();
        assert!(r.matches(&Method::POST, "/v1/responses"));
        assert!(r.matches(&Method::POST, "/openai/v1/responses"));
        assert!(!r.matches(&Method::GET, "/v1/responses"));
        assert!(!r.matches(&Method::POST, "/v1/responses/abc"));
        assert!(!r.matches(&Method::POST, "/v1/chat/completions"));

        let disabled = Rewriter::new(
            Pools::new(&PoolConfig::default()),
            RewriteConfig {
                enabled: false,
                ..RewriteConfig::default()
            },
        );
        assert!(!disabled.matches(&Method::POST, "/v1/responses"));
    }

    #[tokio::test]
    async fn restructures_string_input() {
        let r = rewriter();
        let (parts, out) = run(
            &r,
            r#"{"model":"m","instructions":"sys","input":"hi"}"#,
            &[("authorization", "Bearer sk-test")],
        )
        .await;

        let expected = format!(
            r#"{{"model":"m","prompt_cache_key":"{}","input":[{{"role":"developer","content":"sys"}},{{"role":"user","content":"hi"}}]}}"#,
            auth_key()
        );
        assert_eq!(String::from_utf8(out).unwrap(), expected);
        assert_eq!(parts.headers[CONTENT_LENGTH], expected.len().to_string().as_str());
    }

    #[tokio::test]
    async fn continuation_keeps_instructions_and_splices_key() {
        let r = rewriter();
        let (_, out) = run(
            &r,
            r#"{"instructions":"sys","previous_response_id":"r1"}"#,
            &[("authorization", "Bearer sk-test")],
        )
        .await;
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!(
                r#"{{"prompt_cache_key":"{}","instructions":"sys","previous_response_id":"r1"}}"#,
                auth_key()
            )
        );
    }

    #[tokio::test]
    async fn unrecognized_documents_pass_through_byte_identical() {
        let r = rewriter();
        let body = "{ \"model\" : \"m\",\n \"input\": \"mentions instructions in text\" }";
        let (_, out) = run(&r, body, &[("transfer-encoding", "chunked")]).await;
        assert_eq!(out, body.as_bytes());
    }

    #[tokio::test]
    async fn existing_cache_key_is_never_overwritten() {
        let r = rewriter();
        let body = r#"{"prompt_cache_key":"mine","input":"hi"}"#;
        let (_, out) = run(&r, body, &[("authorization", "Bearer sk-test")]).await;
        assert_eq!(out, body.as_bytes());
    }

    #[tokio::test]
    async fn output_is_a_fixed_point() {
        let r = rewriter();
        let headers = [("authorization", "Bearer sk-test")];
        let body = r#"{"instructions":"sys","input":[{"role":"user","content":"a"}]}"#;
        let (_, first) = run(&r, body, &headers).await;

        let (_, second) = run(&r, first.clone(), &headers).await;
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn gzip_body_is_decoded_and_rewritten() {
        let r = rewriter();
        let compressed = gzip(br#"{"instructions":"sys","input":"hi"}"#);
        let (mut parts, body) = request(
            compressed,
            &[("content-encoding", "gzip"), ("transfer-encoding", "chunked"), ("x-api-key", "k")],
        );
        let body = r.rewrite_request(&mut parts, body, None).await.unwrap();
        let out = axum::body::to_bytes(body, usize::MAX).await.unwrap();

        assert!(parts.headers.get(CONTENT_ENCODING).is_none());
        assert!(parts.headers.get(TRANSFER_ENCODING).is_none());
        assert_eq!(parts.headers[CONTENT_LENGTH], out.len().to_string().as_str());

        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["input"][0], json!({"role": "developer", "content": "sys"}));
        assert_eq!(value["input"][1], json!({"role": "user", "content": "hi"}));
    }

    #[tokio::test]
    async fn corrupt_gzip_is_forwarded_as_received() {
        let r = rewriter();
        let mut compressed = gzip(br#"{"instructions":"sys"}"#);
        let n = compressed.len();
        compressed[n - 8] ^= 0xff;

        let (mut parts, body) = request(compressed.clone(), &[("content-encoding", "gzip")]);
        let body = r.rewrite_request(&mut parts, body, None).await.unwrap();
        let out = axum::body::to_bytes(body, usize::MAX).await.unwrap();

        assert_eq!(&out[..], &compressed[..]);
        assert_eq!(parts.headers[CONTENT_ENCODING], "gzip");
    }

    #[tokio::test]
    async fn invalid_json_falls_back_to_original() {
        let r = rewriter();
        let body = r#"{"instructions": "sys", "input": "#;
        let (_, out) = run(&r, body, &[]).await;
        assert_eq!(out, body.as_bytes());
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let r = Rewriter::new(
            Pools::new(&PoolConfig::default()),
            RewriteConfig {
                max_body_bytes: 16,
                ..RewriteConfig::default()
            },
        );
        let (mut parts, body) = request(r#"{"instructions":"a long instruction"}"#, &[]);
        let err = r.rewrite_request(&mut parts, body, None).await.unwrap_err();
        assert!(matches!(err, RewriteError::BodyTooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn every_buffer_returns_to_the_pool() {
        let r = rewriter();
        for body in [
            r#"{"model":"m"}"#,
            r#"{"instructions":"sys","input":"hi"}"#,
            r#"{"previous_response_id":"r1"}"#,
            r#"{"prompt_cache_key":"k"}"#,
            r#"{"instructions":"#,
        ] {
            let (_, out) = run(&r, body, &[]).await;
            drop(out);
        }
        let stats = r.pools().buffers.stats();
        assert_eq!(stats.outstanding(), 0);
        assert!(stats.reused > 0);
    }

    #[test]
    fn transform_falls_back_when_splice_target_is_not_an_object() {
        let r = rewriter();
        let mut input = r.pools().buffers.acquire();
        input.extend_from_slice(br#"["previous_response_id":1]"#);
        let identity = CacheIdentity::Credential(b"k");

        let (out, outcome) = r.transform(input, &identity);
        assert_eq!(outcome, Outcome::ParseFallback);
        assert_eq!(&out[..], br#"["previous_response_id":1]"#);
    }

    #[test]
    fn summary_tolerates_missing_fields() {
        log_summary(br#"{"model":"gpt","reasoning":{"effort":"high"}}"#);
        log_summary(br#"{"reasoning":null}"#);
        log_summary(b"not json");
    }
}
