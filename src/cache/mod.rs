//! 响应缓存模块：按请求参数缓存模型调用结果，后端可插拔。
//!
//! # Response Caching Module
//!
//! Caches complete model responses keyed by a digest of the request's
//! output-determining parameters, so an identical later request is answered
//! without calling the provider.
//!
//! ## Overview
//!
//! A lookup runs through four stages:
//! 1. [`CachePolicy`] decides whether the call participates at all
//! 2. [`KeyBuilder`] derives a [`CacheKey`] from the allow-listed parameters
//! 3. the [`CacheBackend`] returns the stored entry, if any
//! 4. freshness checks the entry's age against the caller's `s-maxage`
//!
//! Backend faults never reach the caller: they degrade to a miss or a skipped
//! write and are reported to a [`DiagnosticsSink`].
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResponseCache`] | Orchestrates policy, keys, reads, writes and flush buffering |
//! | [`CacheConfig`] | Backend kind, mode, namespace, TTL and limits |
//! | [`CacheBackend`] | Trait for storage engines, with optional capabilities |
//! | [`BackendRegistry`] | Maps a [`BackendKind`] to a backend factory |
//! | [`MemoryBackend`] | In-process LRU backend |
//! | [`DiskBackend`] | One JSON file per key under a directory |
//! | [`KeyBuilder`] | Canonical parameter rendering and hashing |
//! | [`DiagnosticsSink`] | Receives hit/miss/fault events |
//! | [`stream_chunks`] | Replays a cached chat completion as streaming deltas |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_cache::cache::{CacheConfig, CacheLookup, ResponseCache};
//! use ai_lib_cache::types::CallArgs;
//! use serde_json::json;
//!
//! let cache = ResponseCache::new(CacheConfig::default()).unwrap();
//! let args = CallArgs::new()
//!     .with("model", "gpt-4o")
//!     .with("messages", json!([{"role": "user", "content": "hi"}]));
//!
//! assert_eq!(cache.get_blocking(&args), CacheLookup::Miss);
//! cache.set_blocking(&json!({"content": "hello"}), &args);
//! assert!(cache.get_blocking(&args).is_hit());
//! ```

mod backend;
mod config;
mod diagnostics;
mod disk;
pub mod freshness;
mod key;
mod manager;
mod memory;
mod policy;
mod registry;
pub mod replay;

pub use backend::{BackendCapabilities, CacheBackend, CacheEntry, CallContext, WriteOptions};
pub use config::CacheConfig;
pub use diagnostics::{
    CacheEvent, CompositeDiagnostics, DiagnosticsSink, InMemoryDiagnostics, TracingDiagnostics,
    WriteStrategy,
};
pub use disk::DiskBackend;
pub use freshness::Freshness;
pub use key::{CacheKey, KeyBuilder, ALLOW_LIST};
pub use manager::{CacheLookup, CacheStats, ResponseCache, WriteOutcome};
pub use memory::MemoryBackend;
pub use policy::{CacheMode, CachePolicy};
pub use registry::{BackendFactory, BackendKind, BackendParams, BackendRegistry};
pub use replay::{replay_stream, stream_chunks};
