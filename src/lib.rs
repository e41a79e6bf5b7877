//! # ai-lib-cache
//!
//! 面向生成式模型调用的请求级响应缓存：相同的请求参数直接返回已缓存的响应。
//!
//! Request-level response cache for generative model calls. Identical requests
//! (same output-determining parameters) are answered from a pluggable storage
//! backend instead of calling the provider again.
//!
//! ## Core Philosophy
//!
//! - **Never in the way**: backend faults degrade to a miss; they are reported, not raised
//! - **Deterministic keys**: parameter order and plumbing fields never change a key
//! - **Backend-agnostic**: in-memory, disk, or any [`cache::CacheBackend`] you register
//!
//! ## Quick Start
//!
//! ```rust
//! use ai_lib_cache::cache::{CacheConfig, ResponseCache};
//! use ai_lib_cache::types::{CacheControl, CallArgs};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let cache = ResponseCache::new(CacheConfig::default().with_namespace("docs"))?;
//! let args = CallArgs::new()
//!     .with("model", "text-embedding-3-small")
//!     .with("input", "hello")
//!     .with_cache_control(&CacheControl::new().with_max_age(60.0));
//!
//! if cache.get(&args).await.into_hit().is_none() {
//!     let response = json!({"data": [{"embedding": [0.1, 0.2]}]});
//!     cache.set(&response, &args).await;
//! }
//! assert!(cache.get(&args).await.is_hit());
//! # Ok::<(), ai_lib_cache::Error>(())
//! # }).unwrap();
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Orchestrator, key derivation, freshness, backends, registry |
//! | [`batch`] | Write buffering and concurrent fan-out |
//! | [`types`] | Call arguments and per-call cache controls |
//! | [`error`] | Error type with structured context |

pub mod batch;
pub mod cache;
pub mod types;

pub use cache::{CacheConfig, CacheLookup, ResponseCache, WriteOutcome};
pub use types::{CallArgs, CallKind};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
