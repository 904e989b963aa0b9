//! Fixed-size copy chunks.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::{IdleList, PoolStats};

/// Pool of fixed-size scratch chunks used for streaming copies.
#[derive(Debug, Clone)]
pub struct ChunkPool {
    inner: Arc<ChunkPoolInner>,
}

#[derive(Debug)]
struct ChunkPoolInner {
    idle: IdleList<Box<[u8]>>,
    size: usize,
}

impl ChunkPool {
    pub fn new(size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(ChunkPoolInner {
                idle: IdleList::new("chunk", max_idle),
                size,
            }),
        }
    }

    /// Take a zeroed chunk of exactly [`ChunkPool::chunk_size`] bytes.
    pub fn acquire(&self) -> PooledChunk {
        let size = self.inner.size;
        let chunk = self.inner.idle.take_or(|| vec![0u8; size].into_boxed_slice());
        PooledChunk {
            chunk,
            pool: Arc::clone(&self.inner),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.size
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.idle.stats()
    }
}

impl ChunkPoolInner {
    fn release(&self, mut chunk: Box<[u8]>) {
        if chunk.len() != self.size {
            self.idle.discard();
            return;
        }
        chunk.fill(0);
        self.idle.put(chunk);
    }
}

/// Exclusively owned chunk borrowed from a [`ChunkPool`].
pub struct PooledChunk {
    chunk: Box<[u8]>,
    pool: Arc<ChunkPoolInner>,
}

impl Deref for PooledChunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.chunk
    }
}

impl DerefMut for PooledChunk {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.chunk
    }
}

impl fmt::Debug for PooledChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledChunk")
            .field("len", &self.chunk.len())
            .finish()
    }
}

impl Drop for PooledChunk {
    fn drop(&mut self) {
        let chunk = std::mem::take(&mut self.chunk);
        self.pool.release(chunk);
    }
}
