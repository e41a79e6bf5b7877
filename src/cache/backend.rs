//! Backend contract shared by every storage plugin.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::key::CacheKey;
use crate::types::call::CallArgs;
use crate::{Error, Result};

/// What the orchestrator writes: the response plus its write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Seconds since the unix epoch.
    pub timestamp: f64,
    pub response: Value,
}

impl CacheEntry {
    pub fn new(timestamp: f64, response: Value) -> Self {
        Self {
            timestamp,
            response,
        }
    }

    /// The stored (wire) form, `{"timestamp": .., "response": ..}`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "timestamp": self.timestamp,
            "response": self.response,
        })
    }
}

/// Parts of the call a backend may need beyond the key (semantic stores
/// embed the prompt, for instance).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallContext {
    pub model: Option<String>,
    /// `messages`, `prompt` or `input`, whichever the call carries.
    pub prompt: Option<Value>,
}

impl CallContext {
    pub fn from_args(args: &CallArgs) -> Self {
        Self {
            model: args
                .get_non_null("model")
                .and_then(Value::as_str)
                .map(str::to_string),
            prompt: ["messages", "prompt", "input"]
                .iter()
                .find_map(|name| args.get_non_null(name))
                .cloned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Resolved TTL; `None` leaves expiry to the backend's default.
    pub ttl: Option<Duration>,
    pub context: CallContext,
}

impl WriteOptions {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            context: CallContext::default(),
        }
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

/// Optional capabilities. The orchestrator checks these before calling any
/// optional method, so an absent capability is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// `false` for stores that only offer blocking calls (object storage);
    /// the async path then runs the blocking forms in place.
    pub async_io: bool,
    pub batch_write: bool,
    pub pipeline_write: bool,
    pub ping: bool,
    pub delete_keys: bool,
}

impl BackendCapabilities {
    pub fn bulk_write(&self) -> bool {
        self.batch_write || self.pipeline_write
    }
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            async_io: true,
            batch_write: false,
            pipeline_write: false,
            ping: false,
            delete_keys: false,
        }
    }
}

/// Storage plugin contract.
///
/// Implementations are shared across tasks behind an `Arc` and must be safe
/// under concurrent use; the orchestrator adds no locking of its own.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    fn get_blocking(&self, key: &CacheKey, ctx: &CallContext) -> Result<Option<Value>>;

    fn set_blocking(&self, key: &CacheKey, entry: &CacheEntry, opts: &WriteOptions) -> Result<()>;

    async fn get(&self, key: &CacheKey, ctx: &CallContext) -> Result<Option<Value>> {
        self.get_blocking(key, ctx)
    }

    async fn set(&self, key: &CacheKey, entry: &CacheEntry, opts: &WriteOptions) -> Result<()> {
        self.set_blocking(key, entry, opts)
    }

    /// Multi-key write issued as one request.
    async fn batch_write(&self, _entries: &[(CacheKey, CacheEntry)], _opts: &WriteOptions) -> Result<()> {
        Err(Error::unsupported(self.name(), "batch_write"))
    }

    /// Backend-native bulk primitive (e.g. a pipelined transaction).
    async fn pipeline_write(&self, _entries: &[(CacheKey, CacheEntry)], _opts: &WriteOptions) -> Result<()> {
        Err(Error::unsupported(self.name(), "pipeline_write"))
    }

    async fn ping(&self) -> Result<bool> {
        Err(Error::unsupported(self.name(), "ping"))
    }

    /// Returns how many keys were removed.
    async fn delete_keys(&self, _keys: &[CacheKey]) -> Result<usize> {
        Err(Error::unsupported(self.name(), "delete_keys"))
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
