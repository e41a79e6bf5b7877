//! Pending-write buffer for flush-based batching.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::cache::{CacheEntry, CacheKey};

/// A write waiting for the next flush.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub key: CacheKey,
    pub entry: CacheEntry,
    pub ttl: Option<Duration>,
}

impl PendingWrite {
    pub fn new(key: CacheKey, entry: CacheEntry, ttl: Option<Duration>) -> Self {
        Self { key, entry, ttl }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferAddResult {
    Added { count: usize },
    ShouldFlush { count: usize },
}

impl BufferAddResult {
    pub fn should_flush(&self) -> bool {
        matches!(self, BufferAddResult::ShouldFlush { .. })
    }

    pub fn count(&self) -> usize {
        match self {
            BufferAddResult::Added { count } | BufferAddResult::ShouldFlush { count } => *count,
        }
    }
}


/// Accumulates items until `flush_size` is reached.
///
/// The lock is only held for push/drain, never across backend I/O.
pub struct WriteBuffer<T = PendingWrite> {
    flush_size: usize,
    items: Mutex<VecDeque<T>>,
}

impl<T> WriteBuffer<T> {
    pub fn new(flush_size: usize) -> Self {
        Self {
            flush_size: flush_size.max(1),
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn flush_size(&self) -> usize {
        self.flush_size
    }

    pub async fn push(&self, item: T) -> BufferAddResult {
        let mut items = self.items.lock().await;
        items.push_back(item);
        let count = items.len();
        if count >= self.flush_size {
            BufferAddResult::ShouldFlush { count }
        } else {
            BufferAddResult::Added { count }
        }
    }

    pub async fn drain(&self) -> Vec<T> {
        self.items.lock().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
