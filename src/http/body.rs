//! Installing a rewritten buffer as the outgoing request body.

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::request::Parts;
use axum::http::HeaderValue;

use crate::pool::PooledBuf;

/// Replace the request body with `buf` and fix up framing headers.
///
/// Ownership of `buf` moves into the body; it returns to its pool when the
/// forwarder drops the last reference to the body bytes.
pub fn install(parts: &mut Parts, buf: PooledBuf) -> Body {
    parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(buf.len()));
    parts.headers.remove(TRANSFER_ENCODING);
    Body::from(buf.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;
    use axum::http::Request;

    #[tokio::test]
    async fn sets_length_and_clears_chunked() {
        let pool = BufferPool::new(64, 1024, 4);
        let (mut parts, _) = Request::builder()
            .header("transfer-encoding", "chunked")
            .header("content-length", "999")
            .body(())
            .unwrap()
            .into_parts();

        let mut buf = pool.acquire();
        buf.extend_from_slice(b"{\"a\":1}");
        let body = install(&mut parts, buf);

        assert_eq!(parts.headers[CONTENT_LENGTH], "7");
        assert!(!parts.headers.contains_key(TRANSFER_ENCODING));
        assert_eq!(pool.stats().outstanding(), 1);

        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"{\"a\":1}");
        drop(bytes);
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[test]
    fn empty_buffer_releases_immediately() {
        let pool = BufferPool::new(64, 1024, 4);
        let (mut parts, _) = Request::new(()).into_parts();
        let _body = install(&mut parts, pool.acquire());
        assert_eq!(parts.headers[CONTENT_LENGTH], "0");
        assert_eq!(pool.stats().outstanding(), 0);
    }
}
