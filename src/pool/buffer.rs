//! Pooled body buffers.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::Bytes;

use super::{IdleList, PoolStats};

/// Pool of growable byte buffers.
///
/// Cloning is cheap; clones share the same idle list.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

#[derive(Debug)]
struct BufferPoolInner {
    idle: IdleList<Vec<u8>>,
    pre_grow: usize,
    max_keep: usize,
}

impl BufferPool {
    /// Create a pool whose fresh buffers reserve `pre_grow` bytes and whose
    /// buffers above `max_keep` capacity are dropped on release.
    pub fn new(pre_grow: usize, max_keep: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                idle: IdleList::new("buffer", max_idle),
                pre_grow,
                max_keep,
            }),
        }
    }

    /// Take an empty buffer.
    pub fn acquire(&self) -> PooledBuf {
        let pre_grow = self.inner.pre_grow;
        let buf = self.inner.idle.take_or(|| Vec::with_capacity(pre_grow));
        debug_assert!(buf.is_empty());
        PooledBuf {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Capacity ceiling for buffers kept by the pool.
    pub fn max_keep(&self) -> usize {
        self.inner.max_keep
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.idle.stats()
    }
}

impl BufferPoolInner {
    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_keep {
            self.idle.discard();
            return;
        }
        buf.clear();
        self.idle.put(buf);
    }
}

/// Exclusively owned buffer borrowed from a [`BufferPool`].
///
/// Returned to its pool when dropped. Converting it into [`Bytes`] moves the
/// handle into the `Bytes` owner, so the release happens only once the last
/// clone of those bytes is gone.
pub struct PooledBuf {
    buf: Vec<u8>,
    pool: Arc<BufferPoolInner>,
}

impl PooledBuf {
    /// Hand the buffer off as an immutable, reference-counted body chunk.
    pub fn into_bytes(self) -> Bytes {
        if self.buf.is_empty() {
            return Bytes::new();
        }
        Bytes::from_owner(self)
    }
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
