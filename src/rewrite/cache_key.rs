//! Cache-routing key derivation.
//!
//! The key is an opaque digest of whoever sent the request. It only steers
//! upstream cache locality and carries no authorization meaning.

use std::net::SocketAddr;

use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Alternate credential headers, checked after `Authorization` in order.
const ALTERNATE_KEY_HEADERS: [&str; 2] = ["x-api-key", "api-key"];

/// Digest bytes kept; hex encoding doubles the length.
const KEY_BYTES: usize = 16;

/// Identity material a cache key is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheIdentity<'a> {
    /// Raw value of the first non-empty credential header.
    Credential(&'a [u8]),
    /// No credential: client origin plus its user agent.
    Client {
        peer: Option<SocketAddr>,
        user_agent: &'a [u8],
    },
}

impl<'a> CacheIdentity<'a> {
    /// Pick identity material from request headers.
    ///
    /// Priority: `Authorization`, `x-api-key`, `api-key`, then peer address
    /// with `User-Agent`.
    pub fn from_request(headers: &'a HeaderMap, peer: Option<SocketAddr>) -> Self {
        let credential = std::iter::once(headers.get(AUTHORIZATION))
            .chain(ALTERNATE_KEY_HEADERS.iter().map(|name| headers.get(*name)))
            .flatten()
            .map(|v| v.as_bytes())
            .find(|v| !v.is_empty());

        match credential {
            Some(value) => CacheIdentity::Credential(value),
            None => CacheIdentity::Client {
                peer,
                user_agent: headers
                    .get(USER_AGENT)
                    .map(|v| v.as_bytes())
                    .unwrap_or_default(),
            },
        }
    }

    /// Derive the lowercase hex cache key.
    pub fn derive(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            CacheIdentity::Credential(value) => hasher.update(value),
            CacheIdentity::Client { peer, user_agent } => {
                if let Some(peer) = peer {
                    hasher.update(peer.to_string().as_bytes());
                }
                hasher.update(b"|");
                hasher.update(user_agent);
            }
        }
        let digest = hasher.finalize();
        hex::encode(&digest[..KEY_BYTES])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn authorization_wins() {
        let h = headers(&[
            ("authorization", "Bearer sk-1"),
            ("x-api-key", "sk-2"),
            ("user-agent", "cli/1.0"),
        ]);
        assert_eq!(
            CacheIdentity::from_request(&h, None),
            CacheIdentity::Credential(b"Bearer sk-1")
        );
    }

    #[test]
    fn alternate_headers_in_order() {
        let h = headers(&[("api-key", "sk-3"), ("x-api-key", "sk-2")]);
        assert_eq!(
            CacheIdentity::from_request(&h, None),
            CacheIdentity::Credential(b"sk-2")
        );

        let h = headers(&[("authorization", ""), ("api-key", "sk-3")]);
        assert_eq!(
            CacheIdentity::from_request(&h, None),
            CacheIdentity::Credential(b"sk-3")
        );
    }

    #[test]
    fn falls_back_to_client_origin() {
        let peer: SocketAddr = "10.0.0.7:5123".parse().unwrap();
        let h = headers(&[("user-agent", "cli/1.0")]);
        let identity = CacheIdentity::from_request(&h, Some(peer));
        assert_eq!(
            identity,
            CacheIdentity::Client {
                peer: Some(peer),
                user_agent: b"cli/1.0"
            }
        );

        // Same material as hashing "10.0.0.7:5123|cli/1.0" directly.
        let expected = hex::encode(&Sha256::digest(b"10.0.0.7:5123|cli/1.0")[..16]);
        assert_eq!(identity.derive(), expected);
    }

    #[test]
    fn key_is_stable_and_opaque() {
        let a = CacheIdentity::Credential(b"Bearer sk-secret").derive();
        let b = CacheIdentity::Credential(b"Bearer sk-secret").derive();
        let c = CacheIdentity::Credential(b"Bearer sk-other").derive();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
        assert!(!a.contains("secret"));
    }
}
