//! Reusable gzip decoders.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::{IdleList, PoolStats};
use crate::rewrite::decompress::GzipDecoder;

/// Pool of gzip decoders. Inflate state is reset instead of rebuilt.
#[derive(Debug, Clone)]
pub struct DecoderPool {
    inner: Arc<IdleList<GzipDecoder>>,
}

impl DecoderPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(IdleList::new("decoder", max_idle)),
        }
    }

    /// Take a decoder ready for a new stream.
    pub fn acquire(&self) -> PooledDecoder {
        let mut decoder = self.inner.take_or(GzipDecoder::new);
        decoder.reset();
        PooledDecoder {
            decoder: Some(decoder),
            pool: Arc::clone(&self.inner),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }
}

/// Exclusively owned decoder borrowed from a [`DecoderPool`].
#[derive(Debug)]
pub struct PooledDecoder {
    decoder: Option<GzipDecoder>,
    pool: Arc<IdleList<GzipDecoder>>,
}

impl Deref for PooledDecoder {
    type Target = GzipDecoder;

    fn deref(&self) -> &GzipDecoder {
        self.decoder.as_ref().expect("decoder present until drop")
    }
}

impl DerefMut for PooledDecoder {
    fn deref_mut(&mut self) -> &mut GzipDecoder {
        self.decoder.as_mut().expect("decoder present until drop")
    }
}

impl Drop for PooledDecoder {
    fn drop(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.reset();
            self.pool.put(decoder);
        }
    }
}
