//! Reusable resource pools.
//!
//! # Data Flow
//! ```text
//! BufferPool  → PooledBuf     (raw body, decoded body, rewritten body)
//! ChunkPool   → PooledChunk   (fixed-size inflate output scratch)
//! DecoderPool → PooledDecoder (gzip inflate state, reset on reuse)
//!
//! acquire() → exclusive handle → Drop → cleared and pushed back
//!                                     ↘ discarded when over its ceiling
//! ```
//!
//! # Design Decisions
//! - Pools are explicit values owned by the server state, never globals
//! - Release happens in `Drop`, so every exit path returns a handle exactly once
//! - Every object is cleared before it can be handed to another request
//! - Idle lists are bounded in count; buffers are also bounded in capacity

mod buffer;
mod chunk;
mod decoder;

pub use buffer::{BufferPool, PooledBuf};
pub use chunk::{ChunkPool, PooledChunk};
pub use decoder::{DecoderPool, PooledDecoder};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::config::PoolConfig;
use crate::observability::metrics;

/// All pools used by the rewrite pipeline.
#[derive(Debug, Clone)]
pub struct Pools {
    pub buffers: BufferPool,
    pub chunks: ChunkPool,
    pub decoders: DecoderPool,
}

impl Pools {
    /// Create pools sized from configuration.
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            buffers: BufferPool::new(
                config.buffer_pre_grow,
                config.buffer_max_keep,
                config.buffer_max_idle,
            ),
            chunks: ChunkPool::new(config.chunk_size, config.chunk_max_idle),
            decoders: DecoderPool::new(config.decoder_max_idle),
        }
    }
}

/// Point-in-time counters for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Objects constructed because the idle list was empty.
    pub created: u64,
    /// Acquisitions served from the idle list.
    pub reused: u64,
    /// Handles pushed back onto the idle list.
    pub returned: u64,
    /// Handles dropped on release (over ceiling or idle list full).
    pub discarded: u64,
    /// Objects currently idle.
    pub idle: usize,
}

impl PoolStats {
    /// Handles handed out and not yet released.
    pub fn outstanding(&self) -> u64 {
        (self.created + self.reused).saturating_sub(self.returned + self.discarded)
    }
}

/// Bounded free list shared by the concrete pools.
#[derive(Debug)]
struct IdleList<T> {
    name: &'static str,
    items: Mutex<Vec<T>>,
    max_idle: usize,
    created: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
    discarded: AtomicU64,
}

impl<T> IdleList<T> {
    fn new(name: &'static str, max_idle: usize) -> Self {
        Self {
            name,
            items: Mutex::new(Vec::with_capacity(max_idle.min(64))),
            max_idle,
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Pop an idle object, or build one with `create`.
    fn take_or(&self, create: impl FnOnce() -> T) -> T {
        let idle = self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match idle {
            Some(item) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                create()
            }
        }
    }

    /// Push a cleared object back. Drops it when the list is full.
    fn put(&self, item: T) {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if items.len() < self.max_idle {
            items.push(item);
            self.returned.fetch_add(1, Ordering::Relaxed);
        } else {
            drop(items);
            self.discard();
        }
    }

    fn discard(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        metrics::record_pool_discard(self.name);
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: self.items.lock().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_list_respects_max_idle() {
        let list = IdleList::new("test", 1);
        let a = list.take_or(|| 1u8);
        let b = list.take_or(|| 2u8);
        list.put(a);
        list.put(b);

        let stats = list.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.returned, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.outstanding(), 0);

        assert_eq!(list.take_or(|| 9), 1);
        assert_eq!(list.stats().reused, 1);
    }

    #[test]
    fn pools_from_config() {
        let pools = Pools::new(&PoolConfig::default());
        let buf = pools.buffers.acquire();
        assert!(buf.capacity() >= 32 * 1024);
        let chunk = pools.chunks.acquire();
        assert_eq!(chunk.len(), 32 * 1024);
    }
}
