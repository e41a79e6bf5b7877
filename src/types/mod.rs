//! 调用参数类型：缓存层看到的模型调用描述。
//!
//! # Types Module
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CallArgs`] | Flat argument map of one model call |
//! | [`CallKind`] | Completion, embedding, transcription or rerank |
//! | [`CacheControl`] | Per-call `cache` directives (`use-cache`, `ttl`, `s-maxage`) |

pub mod call;

pub use call::{reserved, CacheControl, CallArgs, CallKind};
