//! 批量写入模块：缓存写入的缓冲与并发扇出。
//!
//! # Batched Write Plumbing
//!
//! Writing N single-item cache entries against a networked backend costs N
//! round trips. This module holds the two pieces the cache uses to avoid that:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`WriteBuffer`] | Accumulates pending writes until a flush size is reached |
//! | [`PendingWrite`] | A key/entry/TTL triple waiting in the buffer |
//! | [`fan_out`] | Runs concurrent single writes and waits for all of them |
//! | [`BatchResult`] | Per-index successes and failures of a fan-out |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_cache::batch::WriteBuffer;
//!
//! # tokio_test::block_on(async {
//! let buffer: WriteBuffer<u32> = WriteBuffer::new(2);
//! assert!(!buffer.push(1).await.should_flush());
//! assert!(buffer.push(2).await.should_flush());
//! assert_eq!(buffer.drain().await, vec![1, 2]);
//! # });
//! ```

mod collector;
mod executor;

pub use collector::{BufferAddResult, PendingWrite, WriteBuffer};
pub use executor::{fan_out, BatchResult};
